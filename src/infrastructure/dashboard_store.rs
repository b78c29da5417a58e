// Dashboard definitions loaded from a directory of JSON/TOML files
use crate::domain::dashboard::DashboardConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read dashboard directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate dashboard id {id} in {path}")]
    Duplicate { id: String, path: PathBuf },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub panel_count: usize,
}

/// Immutable, id-keyed set of dashboards.
#[derive(Debug, Clone, Default)]
pub struct DashboardStore {
    dashboards: BTreeMap<String, DashboardConfig>,
}

impl DashboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` and `*.toml` file under `dir`. Unparseable files
    /// are logged and skipped; a missing directory yields an empty store.
    pub fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let mut store = Self::new();
        if !dir.exists() {
            tracing::warn!(path = %dir.display(), "Dashboard directory does not exist");
            return Ok(store);
        }

        let io_err = |source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            match parse_file(&path) {
                Ok(Some(dashboard)) => {
                    tracing::debug!(dashboard = %dashboard.id, path = %path.display(), "Loaded dashboard");
                    store.insert_from(dashboard, &path)?;
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "Skipping dashboard file"),
            }
        }

        tracing::info!(count = store.len(), path = %dir.display(), "Dashboards loaded");
        Ok(store)
    }

    pub fn from_dashboards(dashboards: impl IntoIterator<Item = DashboardConfig>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for dashboard in dashboards {
            store.insert_from(dashboard, Path::new("<memory>"))?;
        }
        Ok(store)
    }

    fn insert_from(&mut self, dashboard: DashboardConfig, path: &Path) -> Result<(), StoreError> {
        if self.dashboards.contains_key(&dashboard.id) {
            return Err(StoreError::Duplicate {
                id: dashboard.id,
                path: path.to_path_buf(),
            });
        }
        self.dashboards.insert(dashboard.id.clone(), dashboard);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DashboardConfig> {
        self.dashboards.get(id)
    }

    pub fn list(&self) -> Vec<DashboardSummary> {
        self.dashboards
            .values()
            .map(|d| DashboardSummary {
                id: d.id.clone(),
                name: d.name.clone(),
                description: d.description.clone(),
                version: d.version.clone(),
                panel_count: d.panels.len(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dashboards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dashboards.is_empty()
    }
}

/// `Ok(None)` for files that are not dashboard definitions.
fn parse_file(path: &Path) -> Result<Option<DashboardConfig>, StoreError> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let Some(extension) = extension.filter(|e| e == "json" || e == "toml") else {
        return Ok(None);
    };

    let parse_err = |message: String| StoreError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| parse_err(e.to_string()))?;
    let dashboard = if extension == "json" {
        DashboardConfig::from_json(&contents).map_err(|e| parse_err(e.to_string()))?
    } else {
        toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
    };
    Ok(Some(dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builder::{DashboardBuilder, PanelBuilder};

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("lens-store-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.0.join(name), contents).unwrap();
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn dashboard_json(id: &str) -> String {
        DashboardBuilder::new(id)
            .panel(PanelBuilder::line("cpu").data_source("metrics").query("SELECT 1").build())
            .build()
            .to_json()
            .unwrap()
    }

    #[test]
    fn test_loads_json_and_toml_and_skips_the_rest() {
        let dir = TempDir::new();
        dir.write("ops.json", &dashboard_json("ops"));
        dir.write(
            "sales.toml",
            r#"
            id = "sales"
            name = "Sales"

            [grid]
            columns = 12
            rowHeight = 30

            [[panels]]
            id = "revenue"
            type = "bar"
            dataSource = "warehouse"
            query = "SELECT day, total FROM revenue"
            position = { x = 0, y = 0 }
            dimensions = { width = 6, height = 4 }
            "#,
        );
        dir.write("broken.json", "{ not json");
        dir.write("README.md", "# dashboards");

        let store = DashboardStore::load_dir(&dir.0).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("sales").unwrap().panels[0].data_source.id, "warehouse");

        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["ops", "sales"]);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let dir = TempDir::new();
        dir.write("a.json", &dashboard_json("ops"));
        dir.write("b.json", &dashboard_json("ops"));

        let err = DashboardStore::load_dir(&dir.0).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id, .. } if id == "ops"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let store = DashboardStore::load_dir(Path::new("/nonexistent/lens/dashboards")).unwrap();
        assert!(store.is_empty());
    }
}
