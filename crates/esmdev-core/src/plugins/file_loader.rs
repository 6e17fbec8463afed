//! Loads `file` namespace modules from disk.

use crate::plugin::{
    HookFilter, HookResult, LoadArgs, LoadHook, LoadResult, Loader, Plugin, PluginBuild,
    PluginError, PluginPipeline,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

pub struct FileLoaderPlugin;

impl Plugin for FileLoaderPlugin {
    fn name(&self) -> &str {
        "file-loader"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_load(HookFilter::any(), self);
    }
}

#[async_trait]
impl LoadHook for FileLoaderPlugin {
    async fn load(
        &self,
        args: &LoadArgs,
        _pipeline: &PluginPipeline,
    ) -> HookResult<Option<LoadResult>> {
        let path = Path::new(&args.path);
        if path.is_dir() {
            return Ok(None);
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(
                LoadResult::contents(esmdev_util::fs::decode_lossy(bytes))
                    .with_loader(Loader::from_path(path)),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PluginError::msg(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_loads_files() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "export const a: number = 1").unwrap();
        let pipeline = PluginPipeline::new(dir.path(), vec![Arc::new(FileLoaderPlugin)]);

        let loaded = pipeline
            .load(&LoadArgs::new(file.to_string_lossy(), None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.contents, "export const a: number = 1");
        assert_eq!(loaded.loader, Some(Loader::Ts));

        let missing = dir.path().join("missing.js");
        assert!(pipeline
            .load(&LoadArgs::new(missing.to_string_lossy(), None))
            .await
            .unwrap()
            .is_none());
    }
}
