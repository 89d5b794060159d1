//! The tile render loop.
//!
//! Tiles are dispatched column by column (x outer, y inner) with at most
//! `concurrency` in flight. A failed tile is logged and counted; it never
//! stops the loop. Cancellation stops dispatching, in-flight tiles finish.

use super::context::JobContext;
use super::progress::JobProgress;
use super::types::{JobParameters, RenderSummary, TileError};
use crate::coord::{edge_flags, tile_center_lon_lat, TileCoord};
use crate::render::{EncodeParams, RenderRequest, Renderer, TileEncoder};
use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum TileOutcome {
    Rendered,
    Skipped,
}

/// Edge buffer of a tile in logical pixels, as `(x, y)`.
///
/// Nothing surrounds the single tile of zoom 0. Above that, columns always
/// get one tile of context since longitude wraps around the antimeridian;
/// rows get it unless the tile touches the top or bottom of the grid.
pub fn edge_buffer(tile: &TileCoord, tile_size: u32) -> (u32, u32) {
    if tile.zoom == 0 {
        return (0, 0);
    }
    let buffer_y = if edge_flags(tile).y { 0 } else { tile_size };
    (tile_size, buffer_y)
}

/// Render every tile of the job's range into its store.
pub async fn render_tiles(
    params: &JobParameters,
    context: &JobContext,
    renderer: &dyn Renderer,
    encoder: &Arc<dyn TileEncoder>,
    progress: &JobProgress,
    cancel: &CancellationToken,
) -> RenderSummary {
    let tally = Mutex::new(RenderSummary::default());

    stream::iter(params.range.tiles())
        .take_while(|_| future::ready(!cancel.is_cancelled()))
        .for_each_concurrent(params.concurrency, |tile| {
            let tally = &tally;
            async move {
                let result = render_tile(&tile, params, context, renderer, encoder).await;
                {
                    let mut summary = tally.lock();
                    summary.attempted += 1;
                    match result {
                        Ok(TileOutcome::Rendered) => summary.rendered += 1,
                        Ok(TileOutcome::Skipped) => summary.skipped += 1,
                        Err(e) => {
                            warn!(
                                z = tile.zoom,
                                x = tile.col,
                                y = tile.row,
                                error = %e,
                                "Error rendering tile"
                            );
                            summary.failed += 1;
                            summary
                                .errors
                                .push(format!("Error rendering tile {}: {}", tile, e));
                        }
                    }
                }
                progress.increment();
            }
        })
        .await;

    let mut summary = tally.into_inner();
    summary.cancelled = summary.attempted < params.range.tile_count();
    summary
}

async fn render_tile(
    tile: &TileCoord,
    params: &JobParameters,
    context: &JobContext,
    renderer: &dyn Renderer,
    encoder: &Arc<dyn TileEncoder>,
) -> Result<TileOutcome, TileError> {
    let JobContext {
        store, tms, style, ..
    } = context;

    if !params.overwrite {
        let exists = {
            let _guard = context.lock().await;
            store
                .has_tile(&style.id, tms.name, tile, params.row_origin)
                .await?
        };
        if exists {
            debug!(z = tile.zoom, x = tile.col, y = tile.row, "Tile already exists, skipping");
            return Ok(TileOutcome::Skipped);
        }
    }

    debug!(
        z = tile.zoom,
        x = tile.col,
        y = tile.row,
        size = tms.tile_size * params.ratio,
        "Rendering tile"
    );

    let (buffer_x, buffer_y) = edge_buffer(tile, tms.tile_size);
    let request = RenderRequest {
        style: &style.json,
        zoom: tile.zoom.saturating_sub(1) as f64,
        center: tile_center_lon_lat(tile),
        width: tms.tile_size + buffer_x * 2,
        height: tms.tile_size + buffer_y * 2,
        ratio: params.ratio,
    };
    let image = renderer.render(request, store).await?;

    let encode_params = EncodeParams {
        buffer_x,
        buffer_y,
        ratio: params.ratio,
    };
    let encoder = Arc::clone(encoder);
    let data = tokio::task::spawn_blocking(move || encoder.encode(image, &encode_params))
        .await
        .map_err(|e| TileError::Task(e.to_string()))??;

    let _guard = context.lock().await;
    store
        .write_tile(&style.id, tms.name, tile, data, params.row_origin)
        .await?;

    Ok(TileOutcome::Rendered)
}
