//! Content-addressed store of fitted draw collections.

use crate::joint_model::{JointModel, ModelData};
use crate::posterior::DrawCollection;
use crate::sampler::{PosteriorSampler, SamplerConfig};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever the persisted draw layout changes
const CACHE_FORMAT: u32 = 1;

#[derive(Serialize)]
struct IdentityDocument<'a> {
    format: u32,
    model: &'a JointModel,
    data: &'a ModelData,
    config: &'a SamplerConfig,
}

/// SHA-256 of the model structure, its priors, the data subsets and the
/// sampler configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelIdentity(String);

impl ModelIdentity {
    pub fn of(model: &JointModel, data: &ModelData, config: &SamplerConfig) -> anyhow::Result<Self> {
        let doc = IdentityDocument {
            format: CACHE_FORMAT,
            model,
            data,
            config,
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&doc)?);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

pub struct FitCache {
    dir: PathBuf,
}

impl FitCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, id: &ModelIdentity) -> PathBuf {
        self.dir.join(format!("{}.draws.json.gz", id))
    }

    pub fn load(&self, id: &ModelIdentity) -> anyhow::Result<Option<DrawCollection>> {
        let path = self.path_of(id);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(GzDecoder::new(File::open(&path)?));
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Write to a temporary file in the cache directory, then rename it
    /// into place
    pub fn store(&self, id: &ModelIdentity, draws: &DrawCollection) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut enc = GzEncoder::new(BufWriter::new(tmp.as_file()), flate2::Compression::default());
            serde_json::to_writer(&mut enc, draws)?;
            enc.finish()?.flush()?;
        }
        let path = self.path_of(id);
        tmp.persist(&path)?;
        Ok(path)
    }
}

///
/// Fit a model at most once per identity.
///
/// * `sampler` - invoked only when the cache has no entry
/// * `cache` - `None` always samples and stores nothing; a failed
///   store is logged and the fresh draws are still returned
///
pub fn fit_or_load(
    sampler: &dyn PosteriorSampler,
    model: &JointModel,
    data: &ModelData,
    config: &SamplerConfig,
    cache: Option<&FitCache>,
) -> anyhow::Result<(DrawCollection, CacheStatus)> {
    let Some(cache) = cache else {
        return Ok((sampler.sample(model, data, config)?, CacheStatus::Miss));
    };

    let id = ModelIdentity::of(model, data, config)?;
    if let Some(draws) = cache.load(&id)? {
        info!("[{}] cache hit {}", model.variant(), cache.path_of(&id).display());
        return Ok((draws, CacheStatus::Hit));
    }

    info!("[{}] cache miss {}", model.variant(), id);
    let draws = sampler.sample(model, data, config)?;
    match cache.store(&id, &draws) {
        Ok(path) => info!("[{}] stored {}", model.variant(), path.display()),
        Err(e) => warn!("[{}] could not cache draws {}: {}", model.variant(), id, e),
    }
    Ok((draws, CacheStatus::Miss))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint_model::Variant;
    use crate::posterior::Diagnostics;
    use crate::simulate::{simulate_table, SimulationConfig};

    /// Every draw at zero
    struct ZeroSampler;

    impl PosteriorSampler for ZeroSampler {
        fn sample(
            &self,
            model: &JointModel,
            _data: &ModelData,
            config: &SamplerConfig,
        ) -> anyhow::Result<DrawCollection> {
            let dim = model.layout().dim;
            let chains = vec![vec![vec![0.0; dim]; config.draws_per_chain()]; config.chains];
            let diagnostics = Diagnostics::compute(model.params(), &chains, vec![0; config.chains], 0.0);
            Ok(DrawCollection {
                params: model.params().to_vec(),
                chains,
                diagnostics,
            })
        }
    }

    #[test]
    fn test_identity_tracks_content() -> anyhow::Result<()> {
        let table = simulate_table(&SimulationConfig::new(2, 2, 2))?;
        let model = JointModel::build(Variant::SpeciesPartitioned, &table)?;
        let data = model.subset(&table)?;
        let config = SamplerConfig::default();

        let a = ModelIdentity::of(&model, &data, &config)?;
        let b = ModelIdentity::of(&model, &data, &config)?;
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);

        let reseeded = SamplerConfig { seed: 1, ..config };
        assert_ne!(a, ModelIdentity::of(&model, &data, &reseeded)?);

        let pooled = JointModel::build(Variant::Pooled, &table)?;
        assert_ne!(a, ModelIdentity::of(&pooled, &data, &config)?);

        let mut fewer = data.clone();
        fewer.rows[1].outcomes.pop();
        fewer.rows[1].species.pop();
        fewer.rows[1].line.pop();
        assert_ne!(a, ModelIdentity::of(&model, &fewer, &config)?);
        Ok(())
    }

    #[test]
    fn test_failed_store_keeps_draws() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // a regular file where the cache directory should be
        let blocker = dir.path().join("cache");
        std::fs::write(&blocker, b"not a directory")?;
        let cache = FitCache::new(&blocker);

        let table = simulate_table(&SimulationConfig::new(2, 2, 2))?;
        let model = JointModel::build(Variant::Pooled, &table)?;
        let data = model.subset(&table)?;
        let config = SamplerConfig {
            warmup: 5,
            iterations: 15,
            chains: 2,
            seed: 1,
        };

        let id = ModelIdentity::of(&model, &data, &config)?;
        assert!(cache.store(&id, &ZeroSampler.sample(&model, &data, &config)?).is_err());

        let (draws, status) = fit_or_load(&ZeroSampler, &model, &data, &config, Some(&cache))?;
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(draws.n_draws(), 20);
        assert_eq!(draws.dim(), model.layout().dim);
        Ok(())
    }
}
