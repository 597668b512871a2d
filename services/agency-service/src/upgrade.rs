//! Planning for package upgrades: which assignments to add and which
//! finished tasks to carry over from the old package.

use std::collections::{HashMap, HashSet};

use crate::models::{Assignment, NewTask, SiteAsset, TaskRecord, Template};
use crate::posting::AssetKey;
use crate::status::TaskStatus;

/// Templates of the new package that the client has no assignment for.
pub fn templates_missing_assignment<'a>(
    templates: &'a [Template],
    existing: &[Assignment],
) -> Vec<&'a Template> {
    let assigned: HashSet<i64> = existing.iter().map(|a| a.template_id).collect();
    let mut seen = HashSet::new();
    templates
        .iter()
        .filter(|template| !assigned.contains(&template.id) && seen.insert(template.id))
        .collect()
}

/// The assignment that receives migrated work: the first one created by
/// this upgrade, else the client's earliest assignment under the new package.
pub fn migration_target(created: &[i64], new_package_assignments: &[Assignment]) -> Option<i64> {
    created
        .first()
        .copied()
        .or_else(|| new_package_assignments.iter().map(|a| a.id).min())
}

/// The package whose done tasks should be carried over, if any. Re-applying
/// the current package only fills assignment gaps.
pub fn migration_source(
    old_package_id: Option<i64>,
    new_package_id: i64,
    migrate: bool,
) -> Option<i64> {
    old_package_id.filter(|old| migrate && *old != new_package_id)
}

/// Maps old asset ids to the new package's asset with the same key.
pub fn asset_remap(old_assets: &[SiteAsset], new_assets: &[SiteAsset]) -> HashMap<i64, i64> {
    let mut by_key: HashMap<AssetKey, i64> = HashMap::new();
    for asset in new_assets {
        by_key.entry(AssetKey::of(asset)).or_insert(asset.id);
    }
    old_assets
        .iter()
        .filter_map(|asset| by_key.get(&AssetKey::of(asset)).map(|id| (asset.id, *id)))
        .collect()
}

#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub tasks: Vec<NewTask>,
    pub skipped: usize,
}

/// Copies done tasks onto `target`, skipping names the target already has
/// and collapsing repeated names in the source to their first occurrence.
pub fn plan_task_migration(
    source: &[TaskRecord],
    target: i64,
    existing_names: &HashSet<String>,
    remap: &HashMap<i64, i64>,
) -> MigrationPlan {
    let mut plan = MigrationPlan::default();
    let mut names = existing_names.clone();

    for task in source {
        let Ok(status) = task.status.parse::<TaskStatus>() else {
            continue;
        };
        if !status.is_done() {
            continue;
        }
        if !names.insert(task.name.clone()) {
            plan.skipped += 1;
            continue;
        }
        plan.tasks.push(NewTask {
            assignment_id: target,
            name: task.name.clone(),
            status,
            category: task.category_name.clone(),
            template_site_asset_id: task
                .template_site_asset_id
                .and_then(|id| remap.get(&id).copied()),
            due_date: task.due_date,
            completed_at: task.completed_at,
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: i64) -> Template {
        Template {
            id,
            name: format!("T{id}"),
        }
    }

    fn assignment(id: i64, template_id: i64) -> Assignment {
        Assignment {
            id,
            client_id: 1,
            template_id,
        }
    }

    fn asset(id: i64, asset_type: &str, name: &str) -> SiteAsset {
        SiteAsset {
            id,
            template_id: 1,
            asset_type: asset_type.to_string(),
            name: name.to_string(),
            default_posting_frequency: 0,
            is_required: false,
        }
    }

    fn task(name: &str, status: &str, asset: Option<i64>) -> TaskRecord {
        TaskRecord {
            id: 0,
            assignment_id: 1,
            name: name.to_string(),
            status: status.to_string(),
            category_name: Some("Social Asset Creation".to_string()),
            template_site_asset_id: asset,
            assigned_to_id: None,
            due_date: None,
            completed_at: None,
        }
    }

    #[test]
    fn creates_one_assignment_per_missing_template() {
        let templates = vec![template(1), template(2), template(2)];
        let missing = templates_missing_assignment(&templates, &[assignment(9, 1)]);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, 2);
    }

    #[test]
    fn repeated_upgrade_adds_nothing() {
        let templates = vec![template(1), template(2)];
        let existing = vec![assignment(9, 1), assignment(10, 2)];
        assert!(templates_missing_assignment(&templates, &existing).is_empty());
    }

    #[test]
    fn same_package_upgrade_skips_migration() {
        assert_eq!(migration_source(Some(2), 2, true), None);
        assert_eq!(migration_source(None, 2, true), None);
        assert_eq!(migration_source(Some(1), 2, false), None);
        assert_eq!(migration_source(Some(1), 2, true), Some(1));

        let assets = vec![asset(11, "social_site", "Facebook")];
        assert!(crate::posting::assets_missing_from(&assets, &assets).is_empty());
    }

    #[test]
    fn target_prefers_new_assignments() {
        assert_eq!(migration_target(&[12, 13], &[assignment(4, 1)]), Some(12));
        assert_eq!(
            migration_target(&[], &[assignment(8, 1), assignment(4, 2)]),
            Some(4)
        );
        assert_eq!(migration_target(&[], &[]), None);
    }

    #[test]
    fn migrates_only_done_tasks_without_duplicate_names() {
        let source = vec![
            task("Facebook", "completed", Some(1)),
            task("Twitter", "qc_approved", Some(2)),
            task("Medium", "pending", None),
            task("Facebook", "data_entered", None),
            task("Reddit", "data_entered", None),
        ];
        let existing = HashSet::from(["Reddit".to_string()]);
        let remap = HashMap::from([(1, 101)]);
        let plan = plan_task_migration(&source, 50, &existing, &remap);

        let names: Vec<_> = plan.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Facebook", "Twitter"]);
        assert_eq!(plan.skipped, 2);
        assert!(plan.tasks.iter().all(|t| t.assignment_id == 50));
        assert_eq!(plan.tasks[0].template_site_asset_id, Some(101));
        assert_eq!(plan.tasks[1].template_site_asset_id, None);
        assert_eq!(plan.tasks[1].status, TaskStatus::QcApproved);
    }

    #[test]
    fn remaps_assets_by_normalized_key() {
        let old = vec![asset(1, "social_site", "Facebook"), asset(2, "web2_site", "Blogger")];
        let new = vec![asset(11, "Social_Site", " facebook")];
        let remap = asset_remap(&old, &new);
        assert_eq!(remap.get(&1), Some(&11));
        assert!(!remap.contains_key(&2));
    }
}
