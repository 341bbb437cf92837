//! Smoke test: convolve a constant volume and its slices.
//!
//! Convolves `ones((100, 120, 140))` with `ones((10, 11, 12))`, then the 2D
//! slice `[0, ...]` and the 1D slice `[0, 0, ...]` of both, printing shape,
//! value range and wall time for each rank.
//!
//! # Run
//!
//! ```bash
//! cargo run --example smoke
//! ```

use std::time::Instant;

use gpuconv::{Convolver, HostArray};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== gpuconv smoke test ===\n");

    let convolver = Convolver::new();

    let data = HostArray::ones(vec![100, 120, 140])?;
    let h = HostArray::ones(vec![10, 11, 12])?;
    let data2 = data.index_axis0(0)?;
    let h2 = h.index_axis0(0)?;
    let data1 = data2.index_axis0(0)?;
    let h1 = h2.index_axis0(0)?;

    for (data, h) in [(&data, &h), (&data2, &h2), (&data1, &h1)] {
        let start = Instant::now();
        let out = convolver.convolve(data, h, None)?;
        let elapsed = start.elapsed();

        let values = out.as_f32().unwrap_or_default();
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        println!(
            "{}D  data {:?}  kernel {:?}  ->  out {:?} {}  range [{}, {}]  ({:?})",
            data.rank(),
            data.shape(),
            h.shape(),
            out.shape(),
            out.element_type(),
            min,
            max,
            elapsed
        );
    }

    println!("\nExpected: every value equals the kernel size (1320, 132, 12).");
    Ok(())
}
