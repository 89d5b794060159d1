//! Render command - run one raster tile rendering job against a store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use tileseed::archive::RowOrigin;
use tileseed::cache::StorageDescriptor;
use tileseed::coord::{bounds_to_tile_range, LonLatBounds, TileRange};
use tileseed::job::{run_job, JobParameters, JobServices, NoopProgressSink, ReportTiming};
use tileseed::render::PngTileEncoder;
use tileseed::tms::WEB_MERCATOR_QUAD;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::{confirm, parse_ratio, resolve_store, GlobalArgs, PerJobMode};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the render command.
#[derive(Debug, Args)]
pub struct RenderArgs {
    /// MapLibre style to render, relative to the store's style directory
    pub style: String,

    /// Store directory
    #[arg(short, long, help_heading = "Render options")]
    pub store: Option<PathBuf>,

    /// API (dataset) id
    #[arg(long, help_heading = "Render options")]
    pub api: String,

    /// Tileset to write
    #[arg(long, help_heading = "Render options")]
    pub tileset: String,

    /// Tiling matrix set
    #[arg(long, default_value = WEB_MERCATOR_QUAD, help_heading = "Render options")]
    pub tms: String,

    /// Zoom level
    #[arg(short = 'z', long, help_heading = "Render options")]
    pub zoom: u8,

    /// Min col
    #[arg(short = 'x', long, default_value_t = 0, help_heading = "Render options")]
    pub minx: u32,

    /// Max col [default: minx]
    #[arg(short = 'X', long, help_heading = "Render options")]
    pub maxx: Option<u32>,

    /// Min row
    #[arg(short = 'y', long, default_value_t = 0, help_heading = "Render options")]
    pub miny: u32,

    /// Max row [default: miny]
    #[arg(short = 'Y', long, help_heading = "Render options")]
    pub maxy: Option<u32>,

    /// Render the tiles covering minLon,minLat,maxLon,maxLat instead of cols/rows
    #[arg(
        long,
        allow_hyphen_values = true,
        conflicts_with_all = ["minx", "maxx", "miny", "maxy"],
        help_heading = "Render options"
    )]
    pub bbox: Option<LonLatBounds>,

    /// Image pixel ratio
    #[arg(short, long, default_value_t = 1, value_parser = parse_ratio, help_heading = "Render options")]
    pub ratio: u32,

    /// Tiles rendered concurrently
    #[arg(short, long, default_value_t = 1, help_heading = "Render options")]
    pub concurrency: usize,

    /// Re-render tiles that already exist
    #[arg(long, help_heading = "Render options")]
    pub overwrite: bool,

    /// Store MBTiles rows counted from the top of the grid (XYZ)
    #[arg(long, help_heading = "Render options")]
    pub force_xyz: bool,

    /// Shard archives per job
    #[arg(long, value_enum, default_value_t = PerJobMode::Detect, help_heading = "Render options")]
    pub per_job: PerJobMode,

    /// External renderer command line [default: from config]
    #[arg(long, help_heading = "Render options")]
    pub renderer: Option<String>,
}

impl RenderArgs {
    /// Tile rectangle selected by either `--bbox` or the col/row options.
    pub fn tile_range(&self) -> Result<TileRange, CliError> {
        let range = match &self.bbox {
            Some(bounds) => bounds_to_tile_range(bounds, self.zoom),
            None => TileRange::new(
                self.zoom,
                self.minx,
                self.maxx.unwrap_or(self.minx),
                self.miny,
                self.maxy.unwrap_or(self.miny),
            ),
        };
        range.map_err(|e| CliError::InvalidArgument(e.to_string()))
    }

    /// Job parameters for a store rooted at `store_root`.
    pub fn to_parameters(&self, store_root: PathBuf) -> Result<JobParameters, CliError> {
        let params = JobParameters {
            id: format!("{}-{}", self.tileset, Utc::now().format("%Y%m%dT%H%M%S")),
            api: self.api.clone(),
            tileset: self.tileset.clone(),
            tms: self.tms.clone(),
            range: self.tile_range()?,
            ratio: self.ratio,
            concurrency: self.concurrency,
            overwrite: self.overwrite,
            row_origin: if self.force_xyz {
                RowOrigin::Top
            } else {
                RowOrigin::Bottom
            },
            storage: StorageDescriptor::Detect {
                store_root,
                style: self.style.clone(),
                per_job: self.per_job.as_option(),
            },
        };
        params.validate()?;
        Ok(params)
    }
}

/// Run the render command.
pub fn run(globals: &GlobalArgs, args: RenderArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(globals)?;
    runner.log_startup("render");

    let store_root = resolve_store(args.store.clone(), runner.config());
    let params = args.to_parameters(store_root)?;

    print_summary(&params);
    if !confirm(globals, "Are you sure?")? {
        info!("Aborted");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || handler_cancel.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let services = JobServices::new(
        runner.renderer(args.renderer.as_deref())?,
        Arc::new(PngTileEncoder::new()),
    )
    .with_cancel(cancel)
    .with_timing(ReportTiming::for_verbosity(runner.verbosity()));

    let runtime = runner.runtime()?;
    let report = runtime.block_on(run_job(&params, &services, &NoopProgressSink))?;
    let summary = &report.summary;

    println!();
    println!("Rendered:  {}", summary.rendered);
    println!("Skipped:   {}", summary.skipped);
    println!("Failed:    {}", summary.failed);
    println!("Elapsed:   {:.1}s", report.elapsed.as_secs_f64());
    if summary.cancelled {
        println!("Job was cancelled after {} tiles", summary.attempted);
    }

    match summary.error_message() {
        Some(message) => Err(CliError::TilesFailed {
            failed: summary.failed,
            message,
        }),
        None => Ok(()),
    }
}

fn print_summary(params: &JobParameters) {
    println!("Render job summary:");
    println!("  Job:      {}", params.id);
    println!("  Store:    {}", params.storage.store_root().display());
    println!("  Style:    {}", params.storage.style_path());
    println!("  Dataset:  {} / {}", params.api, params.tileset);
    println!("  Matrix:   {}", params.tms);
    println!(
        "  Tiles:    {} ({} tiles)",
        params.range,
        params.range.tile_count()
    );
    println!("  Ratio:    {}", params.ratio);
    println!("  Parallel: {}", params.concurrency);
    if params.overwrite {
        println!("  Existing tiles will be overwritten");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RenderArgs,
    }

    fn parse(extra: &[&str]) -> RenderArgs {
        let mut argv = vec!["render", "style.json", "--api", "vineyards", "--tileset", "vineyards"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_max_defaults_to_min() {
        let args = parse(&["-z", "8", "-x", "102", "-y", "153"]);
        let range = args.tile_range().unwrap();
        assert_eq!(range, TileRange::new(8, 102, 102, 153, 153).unwrap());
    }

    #[test]
    fn test_explicit_rectangle() {
        let args = parse(&["-z", "8", "-x", "102", "-X", "103", "-y", "153", "-Y", "154"]);
        assert_eq!(args.tile_range().unwrap().tile_count(), 4);
    }

    #[test]
    fn test_bbox_conflicts_with_cols() {
        let argv = [
            "render", "style.json", "--api", "a", "--tileset", "t", "-z", "2", "-x", "1",
            "--bbox", "0,0,10,10",
        ];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_bbox_selects_covering_tiles() {
        let args = parse(&["-z", "1", "--bbox", "-170,-80,170,80"]);
        assert_eq!(args.tile_range().unwrap(), TileRange::new(1, 0, 1, 0, 1).unwrap());
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let argv = [
            "render", "style.json", "--api", "a", "--tileset", "t", "-z", "2", "--ratio", "3",
        ];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_parameters_use_detect_storage() {
        let args = parse(&["-z", "3", "--per-job", "true", "--force-xyz", "-c", "4"]);
        let params = args.to_parameters(PathBuf::from("/srv/store")).unwrap();

        assert!(params.id.starts_with("vineyards-"));
        assert_eq!(params.concurrency, 4);
        assert_eq!(params.row_origin, RowOrigin::Top);
        assert_eq!(
            params.storage,
            StorageDescriptor::Detect {
                store_root: PathBuf::from("/srv/store"),
                style: "style.json".into(),
                per_job: Some(true),
            }
        );
    }

    #[test]
    fn test_archives_count_rows_from_bottom_by_default() {
        let params = parse(&["-z", "3"])
            .to_parameters(PathBuf::from("/srv/store"))
            .unwrap();
        assert_eq!(params.row_origin, RowOrigin::Bottom);
    }

    #[test]
    fn test_range_outside_matrix_rejected() {
        let args = parse(&["-z", "1", "-x", "2"]);
        assert!(matches!(
            args.to_parameters(PathBuf::from("/srv/store")),
            Err(CliError::Job(_))
        ));
    }
}
