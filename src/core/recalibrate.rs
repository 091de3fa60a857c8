use crate::config::RecalibrationConfig;
use crate::core::correction::{CorrectionEngine, ProductContext};
use crate::core::product::{
    BandKind, SourceProduct, TargetProduct, TileIterator, TileRect, FILE_NAME, GC1_DSD, MPH,
    RECALIBRATED, RECALIBRATED_FAILED, RECALIBRATED_YES, SENSING_START, VC1_DSD,
};
use crate::types::{Channel, RecalError, RecalResult, ReflectanceBand, ReflectanceTile};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Length of the `dd-MMM-yyyy hh:mm:ss` prefix of `SENSING_START`
const SENSING_START_LENGTH: usize = 20;

/// Cooperative cancellation flag, polled once per image row
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Outcome of one recalibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalibrationStatus {
    /// At least one band was recalibrated and the product marked `YES`
    Recalibrated,
    /// Input was already marked `YES`, every band copied unchanged
    AlreadyRecalibrated,
    /// Sensing start outside the drift table, every band copied unchanged
    OutsideDriftTable,
    /// No enabled reflectance band present
    NothingSelected,
    /// Stopped early; the target holds partially written tiles
    Canceled,
}

#[derive(Debug, Clone)]
pub struct RecalibrationReport {
    pub status: RecalibrationStatus,
    pub recalibrated_bands: Vec<String>,
    pub copied_bands: usize,
    pub tiles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandAction {
    CopyFlags,
    Recalibrate(Channel),
    Copy,
}

/// Applies the drift recalibration to every eligible band of a product
pub struct Recalibrator {
    engine: CorrectionEngine,
    config: RecalibrationConfig,
}

impl Recalibrator {
    /// Validate `config` and load its drift table
    pub fn new(config: RecalibrationConfig) -> RecalResult<Self> {
        let engine = CorrectionEngine::from_config(&config)?;
        Ok(Self { engine, config })
    }

    pub fn with_engine(engine: CorrectionEngine, config: RecalibrationConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &CorrectionEngine {
        &self.engine
    }

    pub fn config(&self) -> &RecalibrationConfig {
        &self.config
    }

    /// Recalibrate `source` into `target`.
    ///
    /// `target` must have the geometry and band layout of `source`.
    /// A failing tile marks the target `RECALIBRATED = FAILED` and aborts the
    /// run.
    pub fn process<S, T>(
        &self,
        source: &S,
        target: &mut T,
        cancel: &CancellationToken,
    ) -> RecalResult<RecalibrationReport>
    where
        S: SourceProduct + ?Sized,
        T: TargetProduct + ?Sized,
    {
        let sensing_start = source
            .metadata_attribute(MPH, SENSING_START)
            .ok_or_else(|| RecalError::Metadata(format!("{}.{} missing", MPH, SENSING_START)))?;
        let sensing_start: String = sensing_start.chars().take(SENSING_START_LENGTH).collect();

        let in_range = self.engine.check_acquisition_time_range(&sensing_start)?;
        let already_recalibrated =
            source.metadata_attribute(MPH, RECALIBRATED).as_deref() == Some(RECALIBRATED_YES);
        if already_recalibrated {
            log::info!("Product {} is already recalibrated, copying all bands", source.name());
        }
        let may_recalibrate = in_range && !already_recalibrated;

        let mut report = RecalibrationReport {
            status: RecalibrationStatus::NothingSelected,
            recalibrated_bands: Vec::new(),
            copied_bands: 0,
            tiles: 0,
        };
        let mut context: Option<ProductContext> = None;

        for band in source.band_names() {
            let action = self.band_action(source, &band, may_recalibrate);
            let outcome = match action {
                BandAction::Recalibrate(channel) => {
                    log::info!("Recalibrating band {} ({})", band, channel);
                    self.product_context(source, &sensing_start, &mut context)
                        .and_then(|ctx| {
                            self.recalibrate_band(source, target, &band, channel, ctx, cancel)
                        })
                }
                BandAction::CopyFlags | BandAction::Copy => {
                    self.copy_band(source, target, &band, action, cancel)
                }
            };

            let (tiles, completed) = match outcome {
                Ok(done) => done,
                Err(e) => {
                    target.set_metadata_attribute(MPH, RECALIBRATED, RECALIBRATED_FAILED);
                    log::warn!("Recalibration of {} failed in band {}: {}", source.name(), band, e);
                    return Err(RecalError::Processing(format!("band {}: {}", band, e)));
                }
            };
            report.tiles += tiles;
            if !completed {
                log::info!("Recalibration of {} canceled in band {}", source.name(), band);
                report.status = RecalibrationStatus::Canceled;
                return Ok(report);
            }
            match action {
                BandAction::Recalibrate(_) => report.recalibrated_bands.push(band),
                _ => report.copied_bands += 1,
            }
        }

        report.status = if already_recalibrated {
            RecalibrationStatus::AlreadyRecalibrated
        } else if !in_range {
            RecalibrationStatus::OutsideDriftTable
        } else if report.recalibrated_bands.is_empty() {
            RecalibrationStatus::NothingSelected
        } else {
            target.set_metadata_attribute(MPH, RECALIBRATED, RECALIBRATED_YES);
            RecalibrationStatus::Recalibrated
        };
        log::info!(
            "Finished {}: {:?}, {} bands recalibrated, {} copied",
            source.name(),
            report.status,
            report.recalibrated_bands.len(),
            report.copied_bands
        );
        Ok(report)
    }

    /// Run the three-stage correction over one tile of reflectances.
    ///
    /// Returns the corrected tile and whether every row was processed before
    /// cancellation.
    pub fn recalibrate_tile(
        &self,
        ctx: &ProductContext,
        channel: Channel,
        input: &ReflectanceTile,
        cancel: &CancellationToken,
    ) -> RecalResult<(ReflectanceTile, bool)> {
        let mut output = Array2::zeros(input.dim());
        let mut completed = true;
        for (src_row, mut dst_row) in input.rows().into_iter().zip(output.rows_mut()) {
            if cancel.is_canceled() {
                completed = false;
                break;
            }
            for (dst, &reflectance) in dst_row.iter_mut().zip(src_row.iter()) {
                *dst = self.engine.recalibrate_pixel(ctx, channel, reflectance)?;
            }
        }
        Ok((output, completed))
    }

    /// Recalibrate a whole band held in memory.
    ///
    /// The acquisition time is range checked first: pre-launch times are an
    /// error and times outside the drift table return the input unchanged.
    pub fn recalibrate_array(
        &self,
        sensing_start: &str,
        vc1_filename: &str,
        gc1_filename: &str,
        channel: Channel,
        input: &ReflectanceTile,
    ) -> RecalResult<ReflectanceTile> {
        if !self.engine.check_acquisition_time_range(sensing_start)? {
            return Ok(input.clone());
        }
        let ctx = self
            .engine
            .product_context(sensing_start, vc1_filename, gc1_filename)?;
        let (output, _) = self.recalibrate_tile(&ctx, channel, input, &CancellationToken::new())?;
        Ok(output)
    }

    fn band_action<S: SourceProduct + ?Sized>(
        &self,
        source: &S,
        band: &str,
        may_recalibrate: bool,
    ) -> BandAction {
        if source.band_kind(band) == Some(BandKind::Flag) {
            return BandAction::CopyFlags;
        }
        match ReflectanceBand::from_name(band) {
            Some(refl) if may_recalibrate && self.config.bands.is_enabled(refl) => {
                BandAction::Recalibrate(refl.channel)
            }
            _ => BandAction::Copy,
        }
    }

    fn product_context<'a, S: SourceProduct + ?Sized>(
        &self,
        source: &S,
        sensing_start: &str,
        cached: &'a mut Option<ProductContext>,
    ) -> RecalResult<&'a ProductContext> {
        if cached.is_none() {
            let vc1 = companion_file_name(source, VC1_DSD)?;
            let gc1 = companion_file_name(source, GC1_DSD)?;
            let ctx = self.engine.product_context(sensing_start, &vc1, &gc1)?;
            log::debug!(
                "Context for {}: epoch {:?}, ati {}, {:.3} days since launch",
                source.name(),
                ctx.epoch,
                ctx.bracket.ati,
                ctx.days_since_launch
            );
            *cached = Some(ctx);
        }
        cached
            .as_ref()
            .ok_or_else(|| RecalError::Processing("product context unavailable".to_string()))
    }

    fn recalibrate_band<S, T>(
        &self,
        source: &S,
        target: &mut T,
        band: &str,
        channel: Channel,
        ctx: &ProductContext,
        cancel: &CancellationToken,
    ) -> RecalResult<(usize, bool)>
    where
        S: SourceProduct + ?Sized,
        T: TargetProduct + ?Sized,
    {
        let (rows, cols) = source.dimensions();
        let tiles: Vec<TileRect> = TileIterator::new(rows, cols, self.config.tile_size).collect();

        let compute = |rect: &TileRect| -> RecalResult<(TileRect, ReflectanceTile, bool)> {
            let input = source.read_samples(band, *rect)?;
            let (output, completed) = self.recalibrate_tile(ctx, channel, &input, cancel)?;
            log::debug!("Recalibrated {} tile {:?}", band, rect);
            Ok((*rect, output, completed))
        };

        #[cfg(feature = "parallel")]
        let results: RecalResult<Vec<_>> = {
            use rayon::prelude::*;
            tiles.par_iter().map(compute).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: RecalResult<Vec<_>> = tiles.iter().map(compute).collect();

        let mut completed = true;
        for (rect, output, tile_completed) in results? {
            target.write_samples(band, rect, &output)?;
            completed &= tile_completed;
        }
        Ok((tiles.len(), completed))
    }

    fn copy_band<S, T>(
        &self,
        source: &S,
        target: &mut T,
        band: &str,
        action: BandAction,
        cancel: &CancellationToken,
    ) -> RecalResult<(usize, bool)>
    where
        S: SourceProduct + ?Sized,
        T: TargetProduct + ?Sized,
    {
        let (rows, cols) = source.dimensions();
        let mut count = 0;
        for rect in TileIterator::new(rows, cols, self.config.tile_size) {
            if cancel.is_canceled() {
                return Ok((count, false));
            }
            if action == BandAction::CopyFlags {
                target.write_flag_samples(band, rect, &source.read_flag_samples(band, rect)?)?;
            } else {
                target.write_samples(band, rect, &source.read_samples(band, rect)?)?;
            }
            count += 1;
        }
        Ok((count, true))
    }
}

fn companion_file_name<S: SourceProduct + ?Sized>(source: &S, path: &str) -> RecalResult<String> {
    source
        .metadata_attribute(path, FILE_NAME)
        .ok_or_else(|| RecalError::Metadata(format!("{}.{} missing", path, FILE_NAME)))
}
