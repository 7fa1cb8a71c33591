//! Navigation tree construction.
//!
//! A pure two-pass builder: pass 1 assembles a candidate forest from module,
//! feature and permission rows filtered by institution type, plan scope and
//! the caller's effective permissions; pass 2 collapses it into the shape the
//! client renders (dead ends dropped, trivial grouping levels flattened,
//! siblings ordered). No I/O happens here, which keeps the whole composition
//! testable with plain fixtures.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Feature, Module, Permission};

/// One rendered navigation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NavNode {
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NavNode>>,
}

/// Grouping titles that carry no information of their own; when such a level
/// would flatten into its single child, the child's title wins.
pub fn is_generic_grouping_title(title: &str) -> bool {
    matches!(
        title.trim().to_ascii_lowercase().as_str(),
        "portal" | "portals" | "module" | "modules" | "group" | "menu"
    )
}

/// Candidate node carrying the bookkeeping the collapse pass needs.
#[derive(Debug, Clone)]
struct Candidate {
    key: String,
    title: String,
    icon: Option<String>,
    path: Option<String>,
    sort_order: i32,
    is_module: bool,
    children: Vec<Candidate>,
}

/// Build the navigation forest for one user.
///
/// `is_generic_title` is injected so display policy stays out of the
/// composition rules; [`is_generic_grouping_title`] is the default.
pub fn build_navigation(
    modules: &[Module],
    features: &[Feature],
    permissions: &[Permission],
    user_permission_keys: &HashSet<String>,
    is_admin: bool,
    plan_permission_keys: &HashSet<String>,
    institution_type: &str,
    is_generic_title: &dyn Fn(&str) -> bool,
) -> Vec<NavNode> {
    let mut ordered: Vec<&Module> = modules
        .iter()
        .filter(|m| m.matches_institution_type(institution_type))
        .collect();
    ordered.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.module_title.cmp(&b.module_title))
    });

    let mut features_by_module: HashMap<Uuid, Vec<&Feature>> = HashMap::new();
    for feature in features {
        features_by_module
            .entry(feature.module_id)
            .or_default()
            .push(feature);
    }
    for list in features_by_module.values_mut() {
        list.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.feature_title.cmp(&b.feature_title))
        });
    }

    let mut permissions_by_feature: HashMap<Uuid, Vec<&Permission>> = HashMap::new();
    for permission in permissions {
        if let Some(feature_id) = permission.feature_id {
            permissions_by_feature
                .entry(feature_id)
                .or_default()
                .push(permission);
        }
    }

    // Pass 1: one candidate per visible module, carrying its accepted
    // features as children.
    let mut candidates: HashMap<Uuid, Candidate> = HashMap::new();
    for module in &ordered {
        let accepted: Vec<Candidate> = features_by_module
            .get(&module.module_id)
            .into_iter()
            .flatten()
            .filter_map(|feature| {
                accept_feature(
                    module,
                    feature,
                    permissions_by_feature
                        .get(&feature.feature_id)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]),
                    user_permission_keys,
                    is_admin,
                    plan_permission_keys,
                )
            })
            .collect();

        // A module's own route only matters when it has nothing to group.
        let own_route_usable = accepted.is_empty()
            && module.route_name.is_some()
            && module.route_active_flag != Some(false);

        candidates.insert(
            module.module_id,
            Candidate {
                key: module.module_slug.clone(),
                title: module.module_title.clone(),
                icon: module.icon_name.clone(),
                path: if own_route_usable {
                    module.route_name.clone()
                } else {
                    None
                },
                sort_order: module.sort_order,
                is_module: true,
                children: accepted,
            },
        );
    }

    // Link modules into their parents. A child whose own route is disabled
    // never attaches; a parent outside the visible set makes the child a
    // forest root.
    let candidate_ids: HashSet<Uuid> = candidates.keys().copied().collect();
    let mut roots: Vec<Uuid> = Vec::new();
    let mut attached: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for module in &ordered {
        match module.parent_module_id {
            Some(parent_id) if candidate_ids.contains(&parent_id) => {
                if module.route_active_flag != Some(false) {
                    attached.entry(parent_id).or_default().push(module.module_id);
                }
            }
            _ => roots.push(module.module_id),
        }
    }

    let forest: Vec<Candidate> = roots
        .iter()
        .map(|id| assemble(*id, &mut candidates, &attached))
        .collect();

    // Pass 2.
    forest
        .into_iter()
        .filter_map(|c| collapse(c, is_generic_title))
        .map(strip)
        .collect()
}

fn assemble(
    module_id: Uuid,
    candidates: &mut HashMap<Uuid, Candidate>,
    attached: &HashMap<Uuid, Vec<Uuid>>,
) -> Candidate {
    let mut candidate = candidates
        .remove(&module_id)
        .expect("module candidate assembled twice");
    if let Some(child_ids) = attached.get(&module_id) {
        for &child_id in child_ids {
            candidate
                .children
                .push(assemble(child_id, candidates, attached));
        }
    }
    candidate
}

/// Feature acceptance and route selection.
///
/// A feature is accepted when the caller can use it (admin, or holds at
/// least one of its keys), its keys fall inside the plan (vacuously true for
/// keyless features) and its route is not disabled. The path prefers a
/// permission-level route override among the caller's held permissions, then
/// the feature's own route, then a synthesized slug path.
fn accept_feature(
    module: &Module,
    feature: &Feature,
    permissions: &[&Permission],
    user_permission_keys: &HashSet<String>,
    is_admin: bool,
    plan_permission_keys: &HashSet<String>,
) -> Option<Candidate> {
    if feature.route_active_flag == Some(false) {
        return None;
    }

    let holds_any = is_admin
        || permissions
            .iter()
            .any(|p| user_permission_keys.contains(&p.permission_key));
    if !holds_any {
        return None;
    }

    let licensed = permissions.is_empty()
        || permissions
            .iter()
            .any(|p| plan_permission_keys.contains(&p.permission_key));
    if !licensed {
        return None;
    }

    let mut held: Vec<&&Permission> = permissions
        .iter()
        .filter(|p| is_admin || user_permission_keys.contains(&p.permission_key))
        .collect();
    held.sort_by(|a, b| a.permission_key.cmp(&b.permission_key));

    let route_override = held.iter().find(|p| p.route_name.is_some());

    let (path, title_override) = match route_override {
        Some(p) => (p.route_name.clone(), p.route_title.clone()),
        None if feature.route_name.is_some() => {
            (feature.route_name.clone(), feature.route_title.clone())
        }
        None => (
            Some(format!("/{}/{}", module.module_slug, feature.feature_slug)),
            None,
        ),
    };

    Some(Candidate {
        key: feature.feature_slug.clone(),
        title: title_override.unwrap_or_else(|| feature.feature_title.clone()),
        icon: None,
        path,
        sort_order: feature.sort_order,
        is_module: false,
        children: Vec::new(),
    })
}

/// Collapse one subtree. Returns `None` when the node is a dead end.
fn collapse(mut node: Candidate, is_generic_title: &dyn Fn(&str) -> bool) -> Option<Candidate> {
    let mut children: Vec<Candidate> = node
        .children
        .drain(..)
        .filter_map(|c| collapse(c, is_generic_title))
        .collect();
    children.sort_by_key(|c| c.sort_order);

    match children.len() {
        0 => {
            if node.path.is_some() {
                node.children = Vec::new();
                Some(node)
            } else {
                None
            }
        }
        1 if children[0].children.is_empty() && !children[0].is_module => {
            // One trivial leaf under a grouping level: lift the leaf, keeping
            // the parent's identity unless the title says nothing. The lifted
            // node stops counting as a module level, so a chain of trivial
            // groupings collapses all the way down.
            let child = children.into_iter().next().unwrap();
            let generic = is_generic_title(&node.title);
            Some(Candidate {
                key: if generic { child.key } else { node.key },
                title: if generic { child.title } else { node.title },
                icon: node.icon.or(child.icon),
                path: child.path,
                sort_order: node.sort_order,
                is_module: false,
                children: Vec::new(),
            })
        }
        _ => {
            // A branch navigates through its children, never directly.
            node.path = None;
            node.children = children;
            Some(node)
        }
    }
}

fn strip(candidate: Candidate) -> NavNode {
    NavNode {
        key: candidate.key,
        title: candidate.title,
        icon: candidate.icon,
        path: candidate.path,
        children: if candidate.children.is_empty() {
            None
        } else {
            Some(candidate.children.into_iter().map(strip).collect())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn module(n: u128, slug: &str, title: &str, parent: Option<u128>, sort: i32) -> Module {
        Module {
            module_id: Uuid::from_u128(n),
            parent_module_id: parent.map(Uuid::from_u128),
            module_slug: slug.to_string(),
            module_title: title.to_string(),
            icon_name: None,
            sort_order: sort,
            institution_type_code: None,
            route_name: None,
            route_title: None,
            route_active_flag: None,
            created_utc: Utc::now(),
        }
    }

    fn feature(n: u128, module: u128, slug: &str, title: &str, sort: i32) -> Feature {
        Feature {
            feature_id: Uuid::from_u128(n),
            module_id: Uuid::from_u128(module),
            feature_slug: slug.to_string(),
            feature_title: title.to_string(),
            sort_order: sort,
            route_name: None,
            route_title: None,
            route_active_flag: None,
            created_utc: Utc::now(),
        }
    }

    fn permission(feature: u128, key: &str) -> Permission {
        Permission {
            permission_id: Uuid::new_v4(),
            permission_key: key.to_string(),
            feature_id: Some(Uuid::from_u128(feature)),
            route_name: None,
            route_title: None,
            created_utc: Utc::now(),
        }
    }

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn build(
        modules: &[Module],
        features: &[Feature],
        permissions: &[Permission],
        user: &HashSet<String>,
        is_admin: bool,
        plan: &HashSet<String>,
    ) -> Vec<NavNode> {
        build_navigation(
            modules,
            features,
            permissions,
            user,
            is_admin,
            plan,
            "k12",
            &is_generic_grouping_title,
        )
    }

    #[test]
    fn test_unheld_feature_is_invisible() {
        let modules = vec![module(1, "students", "Students", None, 0)];
        let features = vec![
            feature(10, 1, "list", "Student List", 0),
            feature(11, 1, "admissions", "Admissions", 1),
        ];
        let permissions = vec![
            permission(10, "students:view"),
            permission(11, "admissions:manage"),
        ];
        let user = keys(&["students:view"]);
        let plan = keys(&["students:view", "admissions:manage"]);

        let nav = build(&modules, &features, &permissions, &user, false, &plan);

        // Only one feature survives, so the module flattens onto it.
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].title, "Students");
        assert_eq!(nav[0].path.as_deref(), Some("/students/list"));
        assert!(nav[0].children.is_none());
    }

    #[test]
    fn test_unlicensed_feature_is_invisible_even_for_admin() {
        let modules = vec![module(1, "billing", "Billing", None, 0)];
        let features = vec![feature(10, 1, "invoices", "Invoices", 0)];
        let permissions = vec![permission(10, "billing:manage")];

        let nav = build(
            &modules,
            &features,
            &permissions,
            &keys(&[]),
            true,
            &keys(&[]),
        );
        assert!(nav.is_empty());
    }

    #[test]
    fn test_admin_sees_keyless_features() {
        let modules = vec![module(1, "settings", "Settings", None, 0)];
        let features = vec![feature(10, 1, "general", "General", 0)];

        let as_admin = build(&modules, &features, &[], &keys(&[]), true, &keys(&[]));
        assert_eq!(as_admin.len(), 1);
        assert_eq!(as_admin[0].path.as_deref(), Some("/settings/general"));

        let as_user = build(&modules, &features, &[], &keys(&[]), false, &keys(&[]));
        assert!(as_user.is_empty());
    }

    #[test]
    fn test_route_precedence_override_then_feature_then_synthesized() {
        let modules = vec![module(1, "exams", "Exams", None, 0)];
        let mut with_route = feature(10, 1, "schedule", "Schedule", 0);
        with_route.route_name = Some("/exams/schedule-v2".to_string());
        let features = vec![
            with_route,
            feature(11, 1, "results", "Results", 1),
            feature(12, 1, "entry", "Marks Entry", 2),
        ];
        let mut override_perm = permission(12, "exams:marks");
        override_perm.route_name = Some("/exams/marks/grid".to_string());
        override_perm.route_title = Some("Marks Grid".to_string());
        let permissions = vec![
            permission(10, "exams:schedule"),
            permission(11, "exams:results"),
            override_perm,
        ];
        let user = keys(&["exams:schedule", "exams:results", "exams:marks"]);
        let plan = user.clone();

        let nav = build(&modules, &features, &permissions, &user, false, &plan);
        assert_eq!(nav.len(), 1);
        let children = nav[0].children.as_ref().unwrap();
        assert_eq!(children[0].path.as_deref(), Some("/exams/schedule-v2"));
        assert_eq!(children[1].path.as_deref(), Some("/exams/results"));
        assert_eq!(children[2].path.as_deref(), Some("/exams/marks/grid"));
        assert_eq!(children[2].title, "Marks Grid");
    }

    #[test]
    fn test_disabled_feature_route_is_skipped() {
        let modules = vec![module(1, "fees", "Fees", None, 0)];
        let mut disabled = feature(10, 1, "legacy", "Legacy Fees", 0);
        disabled.route_active_flag = Some(false);
        let permissions = vec![permission(10, "fees:view")];
        let user = keys(&["fees:view"]);

        let nav = build(&modules, &[disabled], &permissions, &user, false, &user);
        assert!(nav.is_empty());
    }

    #[test]
    fn test_institution_type_filter() {
        let mut college_only = module(1, "hostel", "Hostel", None, 0);
        college_only.institution_type_code = Some("college".to_string());
        let features = vec![feature(10, 1, "rooms", "Rooms", 0)];
        let permissions = vec![permission(10, "hostel:view")];
        let user = keys(&["hostel:view"]);

        let nav = build(&[college_only], &features, &permissions, &user, false, &user);
        assert!(nav.is_empty());
    }

    #[test]
    fn test_generic_grouping_title_yields_to_child() {
        let modules = vec![module(1, "portal", "Portal", None, 0)];
        let features = vec![feature(10, 1, "dashboard", "Dashboard", 0)];
        let permissions = vec![permission(10, "dashboard:view")];
        let user = keys(&["dashboard:view"]);

        let nav = build(&modules, &features, &permissions, &user, false, &user);
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].title, "Dashboard");
        assert_eq!(nav[0].key, "dashboard");
    }

    #[test]
    fn test_submodules_nest_and_sort_under_parent() {
        let modules = vec![
            module(1, "academics", "Academics", None, 0),
            module(3, "timetable", "Timetable", Some(1), 2),
            module(2, "curriculum", "Curriculum", Some(1), 1),
        ];
        let features = vec![
            feature(20, 2, "subjects", "Subjects", 0),
            feature(21, 2, "lessons", "Lessons", 1),
            feature(30, 3, "periods", "Periods", 0),
            feature(31, 3, "teachers", "Teacher Allocation", 1),
        ];
        let permissions = vec![
            permission(20, "curriculum:subjects"),
            permission(21, "curriculum:lessons"),
            permission(30, "timetable:periods"),
            permission(31, "timetable:teachers"),
        ];
        let user = keys(&[
            "curriculum:subjects",
            "curriculum:lessons",
            "timetable:periods",
            "timetable:teachers",
        ]);

        let nav = build(&modules, &features, &permissions, &user, false, &user);
        assert_eq!(nav.len(), 1);
        let children = nav[0].children.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].key, "curriculum");
        assert_eq!(children[1].key, "timetable");
        assert_eq!(children[0].children.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_single_feature_chain_collapses_to_the_top_module() {
        let modules = vec![
            module(1, "finance", "Finance", None, 0),
            module(2, "billing", "Billing", Some(1), 0),
        ];
        let features = vec![feature(20, 2, "invoices", "Invoices", 0)];
        let permissions = vec![permission(20, "billing:invoices")];
        let user = keys(&["billing:invoices"]);

        let nav = build(&modules, &features, &permissions, &user, false, &user);

        // The leaf lifts through Billing and again into Finance: one node.
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].key, "finance");
        assert_eq!(nav[0].title, "Finance");
        assert_eq!(nav[0].path.as_deref(), Some("/billing/invoices"));
        assert!(nav[0].children.is_none());
    }

    #[test]
    fn test_generic_titles_in_a_chain_yield_to_the_leaf() {
        let modules = vec![
            module(1, "menu", "Menu", None, 0),
            module(2, "billing", "Billing", Some(1), 0),
        ];
        let features = vec![feature(20, 2, "invoices", "Invoices", 0)];
        let permissions = vec![permission(20, "billing:invoices")];
        let user = keys(&["billing:invoices"]);

        let nav = build(&modules, &features, &permissions, &user, false, &user);
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].key, "billing");
        assert_eq!(nav[0].title, "Billing");
        assert_eq!(nav[0].path.as_deref(), Some("/billing/invoices"));
    }

    #[test]
    fn test_module_route_is_ignored_when_features_are_accepted() {
        let mut with_route = module(1, "students", "Students", None, 0);
        with_route.route_name = Some("/students".to_string());
        let features = vec![
            feature(10, 1, "list", "Student List", 0),
            feature(11, 1, "enroll", "Enrollment", 1),
        ];
        let permissions = vec![
            permission(10, "students:view"),
            permission(11, "students:enroll"),
        ];
        let user = keys(&["students:view", "students:enroll"]);

        let nav = build(&[with_route], &features, &permissions, &user, false, &user);

        // Either a path or children, never both.
        assert_eq!(nav.len(), 1);
        assert!(nav[0].path.is_none());
        assert_eq!(nav[0].children.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_collapse_is_idempotent() {
        fn leaf(key: &str, sort: i32) -> Candidate {
            Candidate {
                key: key.to_string(),
                title: key.to_string(),
                icon: None,
                path: Some(format!("/{}", key)),
                sort_order: sort,
                is_module: false,
                children: Vec::new(),
            }
        }
        fn group(key: &str, title: &str, sort: i32, children: Vec<Candidate>) -> Candidate {
            Candidate {
                key: key.to_string(),
                title: title.to_string(),
                icon: None,
                path: None,
                sort_order: sort,
                is_module: true,
                children,
            }
        }

        let tree = group(
            "root",
            "Root",
            0,
            vec![
                group("wrap", "Menu", 1, vec![leaf("dashboard", 0)]),
                group("empty", "Empty", 0, Vec::new()),
                leaf("reports", 2),
            ],
        );

        let once = collapse(tree, &is_generic_grouping_title).unwrap();
        let twice = collapse(once.clone(), &is_generic_grouping_title).unwrap();
        assert_eq!(strip(once), strip(twice));
    }

    #[test]
    fn test_module_without_features_but_own_route_is_a_leaf() {
        let mut dashboard = module(1, "dashboard", "Dashboard", None, 0);
        dashboard.route_name = Some("/dashboard".to_string());

        let nav = build(&[dashboard], &[], &[], &keys(&[]), false, &keys(&[]));
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].path.as_deref(), Some("/dashboard"));
        assert!(nav[0].children.is_none());
    }

    #[test]
    fn test_empty_plan_yields_empty_forest() {
        let modules = vec![module(1, "students", "Students", None, 0)];
        let features = vec![feature(10, 1, "list", "Student List", 0)];
        let permissions = vec![permission(10, "students:view")];
        let user = keys(&["students:view"]);

        let nav = build(&modules, &features, &permissions, &user, false, &keys(&[]));
        assert!(nav.is_empty());
    }
}
