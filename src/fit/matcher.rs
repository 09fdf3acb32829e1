//! Multi-channel matching.
//!
//! Responsibilities:
//!
//! - validate that both images expose the same channel set
//! - bring differently sized images to a common size (bicubic, destructive)
//! - fit every channel concurrently on a reusable worker pool
//! - hand results back in channel order, failing the whole match on the first
//!   channel error

use std::borrow::Cow;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::domain::{ChannelFit, FitOptions, FitStrategy, LevelsAdjustment};
use crate::error::{AppError, ErrorKind};
use crate::fit::{CancelToken, fit_plane_with_cancel};
use crate::imaging::Bands;

/// Fits levels curves between images, one worker pool for many calls.
///
/// The pool lives as long as the matcher; dropping the matcher joins its
/// threads.
pub struct Matcher {
    pool: rayon::ThreadPool,
    options: FitOptions,
}

impl Matcher {
    /// Matcher with one worker per available core.
    pub fn new(options: FitOptions) -> Result<Self, AppError> {
        Self::with_threads(options, 0)
    }

    /// Matcher with `threads` workers (`0` = available parallelism).
    pub fn with_threads(options: FitOptions, threads: usize) -> Result<Self, AppError> {
        options.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("levels-fit-{i}"))
            .build()
            .map_err(|e| AppError::config(format!("Failed to build worker pool: {e}")))?;
        Ok(Self { pool, options })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// One adjustment per channel, in channel order.
    pub fn match_images(
        &self,
        x: &Bands,
        y: &Bands,
        strategy: FitStrategy,
    ) -> Result<Vec<LevelsAdjustment>, AppError> {
        Ok(self
            .match_bands(x, y, strategy)?
            .into_iter()
            .map(|c| c.fit.adjustment)
            .collect())
    }

    pub fn match_bands(
        &self,
        x: &Bands,
        y: &Bands,
        strategy: FitStrategy,
    ) -> Result<Vec<ChannelFit>, AppError> {
        self.match_bands_with_cancel(x, y, strategy, &CancelToken::new())
    }

    /// Fit `x` (to be leveled) against `y` (to match), channel by channel.
    ///
    /// Tripping `cancel` stops every outstanding channel fit; the call then
    /// returns a `Cancelled` error.
    pub fn match_bands_with_cancel(
        &self,
        x: &Bands,
        y: &Bands,
        strategy: FitStrategy,
        cancel: &CancelToken,
    ) -> Result<Vec<ChannelFit>, AppError> {
        check_channels(x, y)?;
        let (x, y) = common_size(x, y);

        // Tripped by the first failing channel so the others stop early.
        let abort = cancel.child();
        let results = self
            .pool
            .install(|| fit_channels(&x, &y, strategy, &self.options, &abort));

        let fits = first_failure(results)?;
        for c in &fits {
            let [ib, iw, ob, ow, gamma] = c.fit.adjustment.to_8bit();
            info!(
                channel = %c.label,
                input_black = ib,
                input_white = iw,
                output_black = ob,
                output_white = ow,
                gamma,
                rmse = c.fit.rmse,
                degenerate = c.fit.degenerate,
                "fitted levels"
            );
        }
        Ok(fits)
    }
}

fn check_channels(x: &Bands, y: &Bands) -> Result<(), AppError> {
    if x.len() != y.len() {
        return Err(AppError::invalid_input(format!(
            "Channel counts differ: {} vs {}.",
            x.len(),
            y.len()
        )));
    }
    if x.labels() != y.labels() {
        return Err(AppError::invalid_input(format!(
            "Channel sets differ: {} vs {}.",
            x.labels().join(""),
            y.labels().join("")
        )));
    }
    let ((xw, xh), (yw, yh)) = (x.dimensions(), y.dimensions());
    if xw == 0 || xh == 0 || yw == 0 || yh == 0 {
        return Err(AppError::invalid_input("Cannot match an empty image."));
    }
    Ok(())
}

/// Both images resampled down to the element-wise minimum size, or borrowed
/// untouched when they already agree.
fn common_size<'a>(x: &'a Bands, y: &'a Bands) -> (Cow<'a, Bands>, Cow<'a, Bands>) {
    let ((xw, xh), (yw, yh)) = (x.dimensions(), y.dimensions());
    if (xw, xh) == (yw, yh) {
        return (Cow::Borrowed(x), Cow::Borrowed(y));
    }

    let (w, h) = (xw.min(yw), xh.min(yh));
    debug!(
        from_x = %format!("{xw}x{xh}"),
        from_y = %format!("{yw}x{yh}"),
        to = %format!("{w}x{h}"),
        "image sizes differ, resampling"
    );
    (Cow::Owned(x.resize(w, h)), Cow::Owned(y.resize(w, h)))
}

/// Fit every channel pair in parallel, in channel order. A failing channel
/// trips `abort`, which stops the fits still running.
fn fit_channels(
    x: &Bands,
    y: &Bands,
    strategy: FitStrategy,
    options: &FitOptions,
    abort: &CancelToken,
) -> Vec<Result<ChannelFit, AppError>> {
    (0..x.len())
        .into_par_iter()
        .map(|index| {
            let label = &x.labels()[index];
            let xp = x.plane(index).as_raw();
            let yp = y.plane(index).as_raw();
            match fit_plane_with_cancel(xp, yp, strategy, options, abort) {
                Ok(fit) => Ok(ChannelFit {
                    index,
                    label: label.clone(),
                    fit,
                }),
                Err(e) => {
                    abort.cancel();
                    Err(e.in_channel(label))
                }
            }
        })
        .collect()
}

/// The root-cause error if any channel failed. Channels stopped because a
/// sibling failed report `Cancelled`, so those are only returned when nothing
/// else went wrong.
fn first_failure(results: Vec<Result<ChannelFit, AppError>>) -> Result<Vec<ChannelFit>, AppError> {
    let mut cancelled = None;
    let mut fits = Vec::with_capacity(results.len());
    for r in results {
        match r {
            Ok(fit) => fits.push(fit),
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                cancelled.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    match cancelled {
        Some(e) => Err(e),
        None => Ok(fits),
    }
}
