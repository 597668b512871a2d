use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{NewTask, SiteAsset, TaskRecord};
use crate::posting::normalize;
use crate::status::TaskStatus;

pub const FALLBACK_CATEGORY: &str = "Other Asset Creation";

const CATEGORY_BY_ASSET_TYPE: &[(&str, &str)] = &[
    ("social_site", "Social Asset Creation"),
    ("web2_site", "Web 2.0 Asset Creation"),
    ("other_asset", "Additional Asset Creation"),
    ("graphics_design", "Graphics Design"),
    ("image_optimization", "Image Optimization"),
    ("content_writing", "Content Writing"),
    ("content_studio", "Content Studio"),
    ("youtube_video_optimization", "YouTube Video Optimization"),
    ("guest_posting", "Guest Posting"),
];

pub fn category_for_asset_type(asset_type: &str) -> &'static str {
    let asset_type = normalize(asset_type);
    CATEGORY_BY_ASSET_TYPE
        .iter()
        .find(|(kind, _)| *kind == asset_type)
        .map(|(_, category)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

#[derive(Debug, Default)]
pub struct RegenerationPlan {
    pub cancel_task_ids: Vec<i64>,
    pub tasks: Vec<NewTask>,
    /// Assets that get a task in this run, for the optional settings rows.
    pub asset_ids: Vec<i64>,
}

pub fn plan_regeneration(
    assignment_id: i64,
    assets: &[SiteAsset],
    tasks: &[TaskRecord],
    force_recreate: bool,
    due_date: Option<DateTime<Utc>>,
) -> RegenerationPlan {
    let live: Vec<&TaskRecord> = tasks
        .iter()
        .filter(|task| task.status != TaskStatus::Cancelled.as_str())
        .collect();

    let mut plan = RegenerationPlan::default();
    let covered: HashSet<i64> = if force_recreate {
        plan.cancel_task_ids = live.iter().map(|task| task.id).collect();
        HashSet::new()
    } else {
        live.iter()
            .filter_map(|task| task.template_site_asset_id)
            .collect()
    };

    for asset in assets.iter().filter(|asset| !covered.contains(&asset.id)) {
        plan.asset_ids.push(asset.id);
        plan.tasks.push(NewTask {
            assignment_id,
            name: asset.name.trim().to_string(),
            status: TaskStatus::Pending,
            category: Some(category_for_asset_type(&asset.asset_type).to_string()),
            template_site_asset_id: Some(asset.id),
            due_date,
            completed_at: None,
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: i64, asset_type: &str) -> SiteAsset {
        SiteAsset {
            id,
            template_id: 1,
            asset_type: asset_type.to_string(),
            name: format!("Asset {id}"),
            default_posting_frequency: 0,
            is_required: false,
        }
    }

    fn task(id: i64, status: &str, asset: Option<i64>) -> TaskRecord {
        TaskRecord {
            id,
            assignment_id: 5,
            name: format!("Task {id}"),
            status: status.to_string(),
            category_name: None,
            template_site_asset_id: asset,
            assigned_to_id: None,
            due_date: None,
            completed_at: None,
        }
    }

    #[test]
    fn categories_follow_the_lookup_table() {
        assert_eq!(category_for_asset_type("social_site"), "Social Asset Creation");
        assert_eq!(category_for_asset_type(" Web2_Site"), "Web 2.0 Asset Creation");
        assert_eq!(category_for_asset_type("podcast"), FALLBACK_CATEGORY);
    }

    #[test]
    fn fills_only_uncovered_assets() {
        let assets = vec![asset(1, "social_site"), asset(2, "web2_site"), asset(3, "other_asset")];
        let tasks = vec![
            task(10, "completed", Some(1)),
            task(11, "cancelled", Some(2)),
            task(12, "pending", None),
        ];
        let plan = plan_regeneration(5, &assets, &tasks, false, None);
        assert!(plan.cancel_task_ids.is_empty());
        assert_eq!(plan.asset_ids, vec![2, 3]);
        assert_eq!(plan.tasks[0].category.as_deref(), Some("Web 2.0 Asset Creation"));
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn force_recreate_cancels_live_tasks_and_rebuilds_all() {
        let assets = vec![asset(1, "social_site"), asset(2, "web2_site")];
        let tasks = vec![
            task(10, "completed", Some(1)),
            task(11, "cancelled", Some(2)),
            task(12, "pending", None),
        ];
        let plan = plan_regeneration(5, &assets, &tasks, true, None);
        assert_eq!(plan.cancel_task_ids, vec![10, 12]);
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn nothing_to_do_when_everything_is_covered() {
        let assets = vec![asset(1, "social_site")];
        let tasks = vec![task(10, "in_progress", Some(1))];
        let plan = plan_regeneration(5, &assets, &tasks, false, None);
        assert!(plan.tasks.is_empty());
    }
}
