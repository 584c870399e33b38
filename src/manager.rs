use crate::analysis::Analyzer;
use crate::config::Config;
use crate::field::load_field;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub struct Manager {
    cmp_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(cmp_dir: P) -> Result<Self> {
        let cmp_dir = cmp_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(cmp_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { cmp_dir, cfg })
    }

    pub fn analyze_fields(&self) -> Result<()> {
        let analyzer = Analyzer::new(&self.cfg).context("failed to construct analyzer")?;

        let field_files = self
            .glob_files(self.fields_dir(), "field")
            .context("failed to list field files")?;
        if field_files.is_empty() {
            bail!("no field files found in {:?}", self.fields_dir());
        }

        let results_dir = self.results_dir();
        fs::create_dir_all(&results_dir)
            .with_context(|| format!("failed to create {results_dir:?}"))?;

        for (i_file, field_file) in field_files.iter().enumerate() {
            let stem = file_stem(field_file)?;

            let field = load_field(field_file)
                .with_context(|| format!("failed to load {field_file:?}"))?;
            log::info!("loaded {field_file:?} with shape {:?}", field.dim());

            let results = analyzer
                .analyze(field.view())
                .with_context(|| format!("failed to analyze {stem}"))?;
            Analyzer::save_results(&results, self.results_file(stem))
                .context("failed to save results")?;

            let progress = 100.0 * (i_file + 1) as f64 / field_files.len() as f64;
            log::info!("completed {progress:06.2}%");
        }

        Ok(())
    }

    pub fn compare_fields(&self, reference: &str) -> Result<()> {
        let ref_file = self.results_file(reference);
        let ref_results = Analyzer::load_results(&ref_file)
            .with_context(|| format!("failed to load {ref_file:?}"))?;

        let comparisons_dir = self.comparisons_dir();
        fs::create_dir_all(&comparisons_dir)
            .with_context(|| format!("failed to create {comparisons_dir:?}"))?;

        let results_files = self
            .glob_files(self.results_dir(), "results")
            .context("failed to list results files")?;
        for results_file in &results_files {
            let stem = file_stem(results_file)?;
            if stem == reference {
                continue;
            }

            let results = Analyzer::load_results(results_file)
                .with_context(|| format!("failed to load {results_file:?}"))?;
            let comparisons = Analyzer::compare(&results, &ref_results)
                .with_context(|| format!("failed to compare {stem} with {reference}"))?;

            for comparison in &comparisons {
                let x = comparison.difference.x();
                log::debug!(
                    "{stem} {}: x in [{:.4e}, {:.4e}]",
                    comparison.name,
                    x.first().copied().unwrap_or(f64::NAN),
                    x.last().copied().unwrap_or(f64::NAN)
                );
                log::info!(
                    "{stem} {}: mean = {:+.6e}, rms = {:.6e}, max = {:.6e}",
                    comparison.name,
                    comparison.mean,
                    comparison.rms,
                    comparison.max_abs
                );
            }

            Analyzer::save_results(&comparisons, self.comparisons_file(stem))
                .context("failed to save comparisons")?;
        }

        Ok(())
    }

    pub fn clean_outputs(&self) -> Result<()> {
        for dir in [self.results_dir(), self.comparisons_dir()] {
            if dir.is_dir() {
                fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {dir:?}"))?;
                log::info!("removed {dir:?}");
            }
        }
        Ok(())
    }

    fn glob_files(&self, dir: PathBuf, kind: &str) -> Result<Vec<PathBuf>> {
        let pattern = dir.join("*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let files = glob(pattern)
            .with_context(|| format!("failed to glob {kind} files"))?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        Ok(files)
    }

    fn fields_dir(&self) -> PathBuf {
        self.cmp_dir.join("fields")
    }

    fn results_dir(&self) -> PathBuf {
        self.cmp_dir.join("results")
    }

    fn comparisons_dir(&self) -> PathBuf {
        self.cmp_dir.join("comparisons")
    }

    fn results_file(&self, stem: &str) -> PathBuf {
        self.results_dir().join(format!("{stem}.msgpack"))
    }

    fn comparisons_file(&self, stem: &str) -> PathBuf {
        self.comparisons_dir().join(format!("{stem}.msgpack"))
    }
}

fn file_stem(file: &Path) -> Result<&str> {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("file name of {file:?} is not valid UTF-8"))
}
