use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The NOTEDEX_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/notedex/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("NOTEDEX_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("notedex")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }

    pub fn tantivy_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("tantivy");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Resolve the model artifact directory from, in order of priority:
    /// 1. An explicit path (from --model-dir)
    /// 2. The NOTEDEX_MODEL_DIR environment variable
    /// 3. The `model/` directory under the data directory
    pub fn model_dir(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("NOTEDEX_MODEL_DIR") {
            PathBuf::from(val)
        } else {
            self.root.join("model")
        }
    }
}
