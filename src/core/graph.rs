//! Target ordering.
//!
//! Kahn's algorithm over prerequisite edges. When several targets are ready
//! at once, the one declared first wins, so the order is deterministic for
//! a given manifest.

use std::collections::{BTreeSet, HashMap};

use crate::domain::Target;
use crate::error::ForgeError;

/// Order `targets` so that every target follows all of its prerequisites
///
/// Fails with [`ForgeError::Cycle`] (naming every target left on a cycle or
/// behind one) before anything is built.
pub fn topological_order(targets: &[Target]) -> Result<Vec<&Target>, ForgeError> {
    let index: HashMap<&str, usize> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; targets.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];

    for (i, target) in targets.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for prereq in &target.prerequisites {
            let &p = index
                .get(prereq.as_str())
                .ok_or_else(|| ForgeError::UnknownPrerequisite {
                    target: target.name.clone(),
                    prerequisite: prereq.clone(),
                })?;
            // Listing a prerequisite twice is still one edge
            if seen.insert(p) {
                in_degree[i] += 1;
                dependents[p].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..targets.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(targets.len());

    while let Some(next) = ready.pop_first() {
        order.push(&targets[next]);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != targets.len() {
        let stuck = targets
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, t)| t.name.clone())
            .collect();
        return Err(ForgeError::Cycle { targets: stuck });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuildSpec, PackageSpec};
    use std::path::PathBuf;

    fn t(name: &str, prereqs: &[&str]) -> Target {
        Target {
            name: name.to_string(),
            description: String::new(),
            source_path: PathBuf::from("/src").join(name),
            install_path: PathBuf::from("/install").join(name),
            build_path: PathBuf::from("/build").join(name),
            prerequisites: prereqs.iter().map(|p| p.to_string()).collect(),
            build: BuildSpec::default(),
            install_marker_path: PathBuf::from("/install").join(name).join(".m"),
            pins: Vec::new(),
            patches: Vec::new(),
            package: PackageSpec::default(),
            accelerated: false,
        }
    }

    fn names(order: &[&Target]) -> Vec<String> {
        order.iter().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let targets = vec![
            t("glomap", &["colmap-for-glomap", "poselib"]),
            t("ceres", &[]),
            t("colmap", &["ceres"]),
            t("colmap-for-glomap", &["ceres"]),
            t("poselib", &[]),
        ];

        let order = topological_order(&targets).unwrap();
        assert_eq!(
            names(&order),
            vec!["ceres", "colmap", "colmap-for-glomap", "poselib", "glomap"]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let targets = vec![t("a", &["c"]), t("b", &["a"]), t("c", &["b"]), t("d", &[])];
        match topological_order(&targets) {
            Err(ForgeError::Cycle { targets }) => assert_eq!(targets, vec!["a", "b", "c"]),
            other => panic!("expected cycle, got {:?}", other.map(|o| names(&o))),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let targets = vec![t("a", &["a"])];
        assert!(matches!(
            topological_order(&targets),
            Err(ForgeError::Cycle { .. })
        ));
    }

    #[test]
    fn test_unknown_prerequisite() {
        let targets = vec![t("glomap", &["colmap"])];
        assert!(matches!(
            topological_order(&targets),
            Err(ForgeError::UnknownPrerequisite { .. })
        ));
    }

    #[test]
    fn test_duplicate_prerequisite_counts_once() {
        let targets = vec![t("ceres", &[]), t("colmap", &["ceres", "ceres"])];
        assert_eq!(
            names(&topological_order(&targets).unwrap()),
            vec!["ceres", "colmap"]
        );
    }
}
