//! Conflict resolution between the dry-run and execute phases.

use std::collections::BTreeMap;

use fileops_api_models::{Conflict, ConflictAction, OperationRequest, OverwritePolicy};

/// One row of the resolution sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRow {
    /// Conflict reported by the dry-run.
    pub conflict: Conflict,
    /// Explicit choice for this row; the default action applies when absent.
    pub choice: Option<ConflictAction>,
}

/// User decisions for a dry-run's conflicts.
///
/// The default action starts as [`ConflictAction::Skip`] so that closing the
/// sheet without touching it never overwrites anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionSheet {
    rows: Vec<ConflictRow>,
    default_action: ConflictAction,
}

impl ResolutionSheet {
    /// Sheet over `conflicts` with every row following the default action.
    #[must_use]
    pub fn new(conflicts: Vec<Conflict>) -> Self {
        Self {
            rows: conflicts
                .into_iter()
                .map(|conflict| ConflictRow {
                    conflict,
                    choice: None,
                })
                .collect(),
            default_action: ConflictAction::Skip,
        }
    }

    /// Rows in dry-run order.
    #[must_use]
    pub fn rows(&self) -> &[ConflictRow] {
        &self.rows
    }

    /// Whether there is nothing to resolve.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current default action.
    #[must_use]
    pub const fn default_action(&self) -> ConflictAction {
        self.default_action
    }

    /// Change the default action; rows with explicit choices keep them.
    pub const fn set_default(&mut self, action: ConflictAction) {
        self.default_action = action;
    }

    /// Override one row. Returns `false` when `index` is out of range.
    pub fn set_choice(&mut self, index: usize, action: ConflictAction) -> bool {
        self.rows.get_mut(index).is_some_and(|row| {
            row.choice = Some(action);
            true
        })
    }

    /// Drop a row's override so it follows the default again.
    pub fn clear_choice(&mut self, index: usize) {
        if let Some(row) = self.rows.get_mut(index) {
            row.choice = None;
        }
    }

    /// Action that applies to a row.
    #[must_use]
    pub fn effective(&self, index: usize) -> Option<ConflictAction> {
        self.rows
            .get(index)
            .map(|row| row.choice.unwrap_or(self.default_action))
    }

    /// Decisions keyed by every source and destination path exactly as the dry-run reported
    /// them, later rows winning on duplicates.
    #[must_use]
    pub fn decisions(&self) -> BTreeMap<String, ConflictAction> {
        let mut decisions = BTreeMap::new();
        for row in &self.rows {
            let action = row.choice.unwrap_or(self.default_action);
            for path in [&row.conflict.dst_path, &row.conflict.src_path] {
                if !path.trim().is_empty() {
                    decisions.insert(path.clone(), action);
                }
            }
        }
        decisions
    }

    /// Execute request carrying the decisions, `overwrite=ask` and the explicit default action.
    #[must_use]
    pub fn apply(&self, request: &OperationRequest) -> OperationRequest {
        let mut resolved = request.clone();
        resolved.options.dry_run = false;
        resolved.options.overwrite_policy = OverwritePolicy::Ask;
        resolved.options.decisions = self.decisions();
        resolved.options.default_action = Some(self.default_action);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileops_api_models::{DestinationSpec, OperationKind, OperationOptions, SourceSpec, TargetKind};

    fn copy_request() -> OperationRequest {
        OperationRequest {
            op: OperationKind::Copy,
            src: SourceSpec {
                target: TargetKind::Local,
                session_id: None,
                base_dir: "/a".into(),
                relative_paths: vec!["x.txt".into(), "y.txt".into()],
            },
            dst: Some(DestinationSpec {
                target: TargetKind::Local,
                session_id: None,
                path: "/b".into(),
                is_dir: true,
            }),
            options: OperationOptions::default(),
        }
    }

    #[test]
    fn untouched_sheet_skips_everything() {
        let sheet = ResolutionSheet::new(vec![Conflict::new("/a/x.txt", "/b/x.txt")]);
        let resolved = sheet.apply(&copy_request());
        assert_eq!(resolved.options.overwrite_policy, OverwritePolicy::Ask);
        assert_eq!(resolved.options.default_action, Some(ConflictAction::Skip));
        let expected: BTreeMap<_, _> = [
            ("/a/x.txt".to_string(), ConflictAction::Skip),
            ("/b/x.txt".to_string(), ConflictAction::Skip),
        ]
        .into_iter()
        .collect();
        assert_eq!(resolved.options.decisions, expected);
    }

    #[test]
    fn overrides_beat_default_and_policy_stays_ask() {
        let mut sheet = ResolutionSheet::new(vec![
            Conflict::new("/a/x.txt", "/b/x.txt"),
            Conflict::new("/a/y.txt", "/b/y.txt"),
        ]);
        sheet.set_default(ConflictAction::Replace);
        assert!(sheet.set_choice(1, ConflictAction::Skip));
        assert!(!sheet.set_choice(7, ConflictAction::Skip));

        let resolved = sheet.apply(&copy_request());
        let decisions = &resolved.options.decisions;
        assert_eq!(decisions.len(), 4);
        assert_eq!(decisions["/a/x.txt"], ConflictAction::Replace);
        assert_eq!(decisions["/b/y.txt"], ConflictAction::Skip);
        assert_eq!(resolved.options.overwrite_policy, OverwritePolicy::Ask);
        assert_eq!(resolved.options.default_action, Some(ConflictAction::Replace));

        sheet.clear_choice(1);
        assert_eq!(sheet.effective(1), Some(ConflictAction::Replace));
    }

    #[test]
    fn decision_keys_keep_reported_paths_verbatim() {
        let mut sheet = ResolutionSheet::new(vec![
            Conflict::new("/a//photos/", "/b/./photos/"),
            Conflict::new("", "/b/y.txt"),
        ]);
        sheet.set_default(ConflictAction::Replace);

        let decisions = sheet.decisions();
        let keys: Vec<&str> = decisions.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["/a//photos/", "/b/./photos/", "/b/y.txt"]);
    }
}
