//! Staging of support assets into the engine's filesystem.

use futures::future::try_join_all;
use tracing::debug;

use crate::assets::AssetSource;
use crate::config::{AssetManifest, FsLayout};
use crate::error::{FsError, StagingError};
use crate::fs::{ensure_path, join, VirtualFs};

fn write_error(path: &str) -> impl FnOnce(FsError) -> StagingError + '_ {
    move |source| StagingError::Write {
        path: path.to_string(),
        source,
    }
}

/// Writes the code models and initialization script where the engine
/// looks for them.
#[derive(Debug, Clone, Copy)]
pub struct Stager<'a> {
    manifest: &'a AssetManifest,
    layout: &'a FsLayout,
}

impl<'a> Stager<'a> {
    pub fn new(manifest: &'a AssetManifest, layout: &'a FsLayout) -> Self {
        Self { manifest, layout }
    }

    /// Fetch every asset and write it into `fs`.
    ///
    /// Code models are fetched and written concurrently. The first failure
    /// aborts staging; on success every asset has been written.
    pub async fn stage(
        &self,
        assets: &dyn AssetSource,
        fs: &dyn VirtualFs,
    ) -> Result<(), StagingError> {
        let library_dir = self.layout.library_dir.as_str();
        ensure_path(fs, library_dir)
            .await
            .map_err(write_error(library_dir))?;
        let scripts_dir = self.layout.scripts_dir.as_str();
        ensure_path(fs, scripts_dir)
            .await
            .map_err(write_error(scripts_dir))?;

        try_join_all(self.manifest.models.iter().map(|name| async move {
            let data = assets.fetch_binary(&self.manifest.model_path(name)).await?;
            let target = join(library_dir, name);
            fs.write_file(&target, &data)
                .await
                .map_err(write_error(&target))?;
            debug!(model = %name, bytes = data.len(), "staged code model");
            Ok::<_, StagingError>(())
        }))
        .await?;

        let script = assets.fetch_text(&self.manifest.init_script).await?;
        debug!(bytes = script.len(), "fetched init script");
        for target in self.layout.init_script_targets() {
            fs.write_file(&target, script.as_bytes())
                .await
                .map_err(write_error(&target))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use crate::testing::MemoryAssets;

    #[tokio::test]
    async fn stages_every_asset() {
        let assets = MemoryAssets::engine_defaults();
        let fs = MemFs::new();
        let manifest = AssetManifest::default();
        let layout = FsLayout::default();

        Stager::new(&manifest, &layout)
            .stage(&assets, &fs)
            .await
            .unwrap();

        for name in &manifest.models {
            let path = format!("/usr/local/lib/ngspice/{}", name);
            assert_eq!(
                fs.read_file(&path).await.unwrap(),
                assets.get(&manifest.model_path(name)).unwrap()
            );
        }
        let script = assets.get("spinit").unwrap();
        assert_eq!(
            fs.read_file("/usr/local/share/ngspice/scripts/spinit")
                .await
                .unwrap(),
            script
        );
        assert_eq!(fs.read_file("/spinit").await.unwrap(), script);
        assert_eq!(fs.files().len(), 9);
    }

    #[tokio::test]
    async fn missing_model_aborts_staging() {
        let assets = MemoryAssets::engine_defaults().without("cm/tlines.cm");
        let fs = MemFs::new();
        let manifest = AssetManifest::default();
        let layout = FsLayout::default();

        let err = Stager::new(&manifest, &layout)
            .stage(&assets, &fs)
            .await
            .unwrap_err();
        assert!(matches!(&err, StagingError::Fetch(e) if e.status() == Some(404)));
        assert!(err.to_string().contains("cm/tlines.cm"));
        assert!(!fs.is_file("/spinit"));
    }

    #[tokio::test]
    async fn missing_script_aborts_staging() {
        let assets = MemoryAssets::engine_defaults().without("spinit");
        let fs = MemFs::new();
        let manifest = AssetManifest::default();
        let layout = FsLayout::default();

        let err = Stager::new(&manifest, &layout)
            .stage(&assets, &fs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("spinit"));
    }

    #[tokio::test]
    async fn blocked_directory_is_a_write_error() {
        let assets = MemoryAssets::engine_defaults();
        let fs = MemFs::new();
        fs.write_file("/usr", b"not a dir").await.unwrap();
        let manifest = AssetManifest::default();
        let layout = FsLayout::default();

        let err = Stager::new(&manifest, &layout)
            .stage(&assets, &fs)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StagingError::Write { ref path, .. } if path == "/usr/local/lib/ngspice"
        ));
    }
}
