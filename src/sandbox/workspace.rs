use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempDir;
use uuid::Uuid;

/// Run-scoped directory holding one submission's source and binary.
///
/// The directory is deleted on drop, so every exit path of a grading run
/// (error, timeout, unwinding) cleans up.
#[derive(Debug)]
pub struct Workspace {
    run_id: Uuid,
    dir: TempDir,
}

impl Workspace {
    pub fn create_in(root: &Path) -> anyhow::Result<Self> {
        let run_id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("arena-{}-", run_id.as_simple()))
            .tempdir_in(root)
            .with_context(|| format!("failed to create workspace under {}", root.display()))?;
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write_source(&self, name: &str, source: &str) -> anyhow::Result<PathBuf> {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, source.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::Workspace;

    #[tokio::test]
    async fn removes_directory_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create_in(root.path()).unwrap();
        let source = ws.write_source("main.py", "print(1)").await.unwrap();
        let dir = ws.path().to_path_buf();
        assert!(source.exists());

        drop(ws);
        assert!(!dir.exists());
        assert!(!source.exists());
    }
}
