//! Recurring posting tasks for site assets that need periodic activity.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{NewTask, SiteAsset};
use crate::status::TaskStatus;

/// Upper bound on posting tasks per asset and period, whatever the asset row says.
pub const MAX_POSTINGS_PER_PERIOD: i32 = 31;

/// Identity of an asset across packages: type and name, lower-cased and
/// with whitespace collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    pub asset_type: String,
    pub name: String,
}

pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl AssetKey {
    pub fn of(asset: &SiteAsset) -> Self {
        Self {
            asset_type: normalize(&asset.asset_type),
            name: normalize(&asset.name),
        }
    }
}

/// Assets of `new` whose key does not occur in `old`.
pub fn assets_missing_from<'a>(old: &[SiteAsset], new: &'a [SiteAsset]) -> Vec<&'a SiteAsset> {
    let known: HashSet<AssetKey> = old.iter().map(AssetKey::of).collect();
    new.iter()
        .filter(|asset| !known.contains(&AssetKey::of(asset)))
        .collect()
}

pub fn posting_category(asset_type: &str) -> Option<&'static str> {
    match normalize(asset_type).as_str() {
        "social_site" => Some("Social Posting"),
        "web2_site" => Some("Blog Posting"),
        "other_asset" => Some("Asset Posting"),
        _ => None,
    }
}

pub fn is_posting_asset(asset: &SiteAsset) -> bool {
    asset.default_posting_frequency > 0 && posting_category(&asset.asset_type).is_some()
}

pub fn posting_task_name(asset_name: &str, n: i32, total: i32) -> String {
    format!("{} Posting {}/{}", asset_name.trim(), n, total)
}

#[derive(Debug, Default)]
pub struct PostingPlan {
    pub tasks: Vec<NewTask>,
    pub skipped_existing: usize,
    /// Eligible assets whose template has no assignment for the client.
    pub unassigned_assets: Vec<i64>,
    /// Assets whose frequency exceeded [`MAX_POSTINGS_PER_PERIOD`].
    pub capped_assets: Vec<i64>,
}

/// Spreads `frequency` tasks per asset evenly over one posting period,
/// skipping names that already exist in the target assignment.
pub fn plan_posting_tasks(
    assets: &[&SiteAsset],
    assignment_by_template: &HashMap<i64, i64>,
    existing_names: &HashMap<i64, HashSet<String>>,
    start: DateTime<Utc>,
    period_days: i64,
) -> PostingPlan {
    let mut plan = PostingPlan::default();
    let mut taken: HashMap<i64, HashSet<String>> = existing_names.clone();
    let period_hours = period_days.max(1) * 24;

    for asset in assets.iter().filter(|asset| is_posting_asset(asset)) {
        let Some(&assignment_id) = assignment_by_template.get(&asset.template_id) else {
            plan.unassigned_assets.push(asset.id);
            continue;
        };
        let category = posting_category(&asset.asset_type).map(str::to_string);
        let total = asset.default_posting_frequency.min(MAX_POSTINGS_PER_PERIOD);
        if total < asset.default_posting_frequency {
            plan.capped_assets.push(asset.id);
        }
        let names = taken.entry(assignment_id).or_default();

        for n in 1..=total {
            let name = posting_task_name(&asset.name, n, total);
            if !names.insert(name.clone()) {
                plan.skipped_existing += 1;
                continue;
            }
            let offset = Duration::hours(period_hours * i64::from(n) / i64::from(total));
            plan.tasks.push(NewTask {
                assignment_id,
                name,
                status: TaskStatus::Pending,
                category: category.clone(),
                template_site_asset_id: Some(asset.id),
                due_date: Some(start + offset),
                completed_at: None,
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn asset(id: i64, template_id: i64, asset_type: &str, name: &str, frequency: i32) -> SiteAsset {
        SiteAsset {
            id,
            template_id,
            asset_type: asset_type.to_string(),
            name: name.to_string(),
            default_posting_frequency: frequency,
            is_required: true,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn keys_ignore_case_and_spacing() {
        let a = asset(1, 1, "Social_Site", "  Facebook   Page ", 0);
        let b = asset(2, 2, "social_site", "facebook page", 0);
        assert_eq!(AssetKey::of(&a), AssetKey::of(&b));
    }

    #[test]
    fn only_assets_new_to_the_package_are_selected() {
        let old = vec![asset(1, 10, "social_site", "Facebook", 4)];
        let new = vec![
            asset(2, 20, "social_site", "facebook ", 4),
            asset(3, 20, "web2_site", "Medium", 2),
        ];
        let missing = assets_missing_from(&old, &new);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, 3);

        let all = assets_missing_from(&[], &new);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn spreads_tasks_over_the_period() {
        let medium = asset(3, 20, "web2_site", "Medium", 2);
        let assignments = HashMap::from([(20, 200)]);
        let plan = plan_posting_tasks(&[&medium], &assignments, &HashMap::new(), start(), 30);

        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].name, "Medium Posting 1/2");
        assert_eq!(plan.tasks[0].assignment_id, 200);
        assert_eq!(plan.tasks[0].category.as_deref(), Some("Blog Posting"));
        assert_eq!(plan.tasks[0].due_date, Some(start() + Duration::days(15)));
        assert_eq!(plan.tasks[1].due_date, Some(start() + Duration::days(30)));
    }

    #[test]
    fn existing_names_make_generation_idempotent() {
        let medium = asset(3, 20, "web2_site", "Medium", 2);
        let assignments = HashMap::from([(20, 200)]);
        let existing = HashMap::from([(
            200,
            HashSet::from(["Medium Posting 1/2".to_string()]),
        )]);
        let plan = plan_posting_tasks(&[&medium], &assignments, &existing, start(), 30);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].name, "Medium Posting 2/2");
        assert_eq!(plan.skipped_existing, 1);
    }

    #[test]
    fn ignores_ineligible_and_reports_unassigned() {
        let design = asset(4, 20, "graphics_design", "Banner", 3);
        let silent = asset(5, 20, "social_site", "Pinterest", 0);
        let orphan = asset(6, 30, "social_site", "X", 1);
        let assignments = HashMap::from([(20, 200)]);
        let plan = plan_posting_tasks(
            &[&design, &silent, &orphan],
            &assignments,
            &HashMap::new(),
            start(),
            30,
        );
        assert!(plan.tasks.is_empty());
        assert_eq!(plan.unassigned_assets, vec![6]);
    }

    #[test]
    fn oversized_frequency_is_capped() {
        let runaway = asset(7, 20, "social_site", "Feed", 100_000);
        let assignments = HashMap::from([(20, 200)]);
        let plan = plan_posting_tasks(&[&runaway], &assignments, &HashMap::new(), start(), 30);
        assert_eq!(plan.tasks.len(), MAX_POSTINGS_PER_PERIOD as usize);
        assert_eq!(plan.tasks[0].name, "Feed Posting 1/31");
        assert_eq!(plan.tasks[30].due_date, Some(start() + Duration::days(30)));
        assert_eq!(plan.capped_assets, vec![7]);
    }

    #[test]
    fn upgrade_scenario_posts_only_for_the_new_asset() {
        let old = vec![asset(1, 10, "social_site", "A1", 2)];
        let new = vec![
            asset(11, 20, "social_site", "A1", 2),
            asset(12, 20, "social_site", "A2", 2),
        ];
        let fresh = assets_missing_from(&old, &new);
        let assignments = HashMap::from([(20, 500)]);
        let plan = plan_posting_tasks(&fresh, &assignments, &HashMap::new(), start(), 30);
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan
            .tasks
            .iter()
            .all(|task| task.template_site_asset_id == Some(12)));
    }
}
