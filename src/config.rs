use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;
use crate::model::{ClassBand, ExamType};

pub const CONFIG_KEY: &str = "gradebook.config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GradebookConfig {
    pub default_academic_year: String,
    pub default_exam_type: ExamType,
    /// How often a live subscription checks for commits made by other
    /// processes on the same workspace.
    pub sync_poll_ms: u64,
    pub subjects: SubjectDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SubjectDefaults {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub higher_secondary: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for SubjectDefaults {
    fn default() -> Self {
        Self {
            primary: names(&[
                "English",
                "Mathematics",
                "Hindi",
                "Environmental Studies",
                "Telugu",
            ]),
            secondary: names(&[
                "English",
                "Mathematics",
                "Hindi",
                "Science",
                "Social Studies",
                "Telugu",
            ]),
            higher_secondary: names(&[
                "English",
                "Mathematics",
                "Physics",
                "Chemistry",
                "Biology",
                "Social Studies",
                "Telugu",
            ]),
        }
    }
}

impl Default for GradebookConfig {
    fn default() -> Self {
        Self {
            default_academic_year: "2025-26".to_string(),
            default_exam_type: ExamType::FA1,
            sync_poll_ms: 250,
            subjects: SubjectDefaults::default(),
        }
    }
}

impl GradebookConfig {
    pub fn default_subjects(&self, class_name: &str) -> &[String] {
        match ClassBand::for_class(class_name) {
            ClassBand::Primary => &self.subjects.primary,
            ClassBand::Secondary => &self.subjects.secondary,
            ClassBand::HigherSecondary => &self.subjects.higher_secondary,
        }
    }
}

/// Stored config, or defaults for a workspace that never saved one.
pub fn load(conn: &Connection) -> anyhow::Result<GradebookConfig> {
    match db::settings_get_json(conn, CONFIG_KEY)? {
        Some(v) => serde_json::from_value(v).context("stored gradebook config is invalid"),
        None => Ok(GradebookConfig::default()),
    }
}

pub fn store(conn: &Connection, cfg: &GradebookConfig) -> anyhow::Result<()> {
    let v = serde_json::to_value(cfg)?;
    db::settings_set_json(conn, CONFIG_KEY, &v)
}

/// Applies a JSON merge patch (objects merge recursively, `null` resets a
/// field to its default) and returns the validated result.
pub fn apply_patch(
    current: &GradebookConfig,
    patch: &serde_json::Value,
) -> anyhow::Result<GradebookConfig> {
    if !patch.is_object() {
        anyhow::bail!("config patch must be an object");
    }
    let mut merged = serde_json::to_value(current)?;
    merge(&mut merged, patch);
    let cfg: GradebookConfig =
        serde_json::from_value(merged).context("config patch does not fit the config shape")?;
    if cfg.sync_poll_ms == 0 {
        anyhow::bail!("syncPollMs must be > 0");
    }
    Ok(cfg)
}

fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(t), serde_json::Value::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    t.remove(k);
                } else {
                    merge(t.entry(k.clone()).or_insert(serde_json::Value::Null), v);
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let shared = db::open_in_memory().expect("db");
        let conn = shared.lock().expect("lock");
        assert_eq!(load(&conn).expect("load"), GradebookConfig::default());
    }

    #[test]
    fn patch_merges_nested_fields_and_persists() {
        let shared = db::open_in_memory().expect("db");
        let conn = shared.lock().expect("lock");
        let cfg = apply_patch(
            &GradebookConfig::default(),
            &json!({ "defaultExamType": "SA1", "subjects": { "primary": ["English", "Kannada"] } }),
        )
        .expect("patch");
        assert_eq!(cfg.default_exam_type, ExamType::SA1);
        assert_eq!(cfg.subjects.primary, vec!["English", "Kannada"]);
        assert_eq!(cfg.subjects.secondary, SubjectDefaults::default().secondary);

        store(&conn, &cfg).expect("store");
        assert_eq!(load(&conn).expect("load"), cfg);
    }

    #[test]
    fn null_resets_and_bad_shapes_are_rejected() {
        let mut cfg = GradebookConfig::default();
        cfg.sync_poll_ms = 900;
        let reset = apply_patch(&cfg, &json!({ "syncPollMs": null })).expect("patch");
        assert_eq!(reset.sync_poll_ms, 250);

        assert!(apply_patch(&cfg, &json!({ "unknownField": 1 })).is_err());
        assert!(apply_patch(&cfg, &json!({ "defaultExamType": "FA9" })).is_err());
        assert!(apply_patch(&cfg, &json!({ "syncPollMs": 0 })).is_err());
        assert!(apply_patch(&cfg, &json!([1, 2])).is_err());
    }

    #[test]
    fn default_subjects_follow_class_band() {
        let cfg = GradebookConfig::default();
        assert!(cfg
            .default_subjects("Class 3")
            .contains(&"Environmental Studies".to_string()));
        assert!(cfg.default_subjects("Class 7").contains(&"Science".to_string()));
        assert!(cfg.default_subjects("Class LKG").contains(&"Physics".to_string()));
    }
}
