//! GPU convolution tests.
//!
//! These tests compare device results against a host reference convolution
//! and check the edge-clamp and shape properties at every rank.
//!
//! Run with: cargo test --test gpu_convolve -- --ignored

use gpuconv::gpu::{GpuImage, GpuTensor, KernelArg, Program};
use gpuconv::source::CONVOLVE_WGSL;
use gpuconv::{
    ArrayData, ConvError, Convolver, ElementType, HostArray, WgpuBackend, WgpuOptions,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Tolerance for floating-point comparison.
const EPSILON: f32 = 1e-4;

fn backend() -> WgpuBackend {
    WgpuBackend::init(WgpuOptions::default()).expect("GPU init")
}

/// Compares two f32 slices with a relative tolerance.
fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let scale = x.abs().max(y.abs()).max(1.0);
        assert!(
            (x - y).abs() <= tol * scale,
            "Mismatch at index {}: {} vs {}",
            i,
            x,
            y
        );
    }
}

/// Host reference: edge-clamped true convolution, rank 1 to 3.
fn reference_convolve(data: &[f32], shape: &[usize], h: &[f32], hshape: &[usize]) -> Vec<f32> {
    let pad = |s: &[usize]| {
        let mut out = [1usize; 3];
        out[3 - s.len()..].copy_from_slice(s);
        out
    };
    let [nz, ny, nx] = pad(shape);
    let [hz, hy, hx] = pad(hshape);
    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;

    let mut out = vec![0.0f32; data.len()];
    for l in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let mut acc = 0.0f32;
                for kz in 0..hz {
                    let z = clamp((l + hz / 2) as isize - kz as isize, nz);
                    for ky in 0..hy {
                        let y = clamp((j + hy / 2) as isize - ky as isize, ny);
                        for kx in 0..hx {
                            let x = clamp((i + hx / 2) as isize - kx as isize, nx);
                            acc += h[(kz * hy + ky) * hx + kx] * data[(z * ny + y) * nx + x];
                        }
                    }
                }
                out[(l * ny + j) * nx + i] = acc;
            }
        }
    }
    out
}

fn random_array(shape: Vec<usize>, seed: u64) -> HostArray {
    let mut rng = StdRng::seed_from_u64(seed);
    let len: usize = shape.iter().product();
    let values = (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    HostArray::from_f32(shape, values).unwrap()
}

// =============================================================================
// Smoke scenario
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_smoke_scenario_every_rank() {
    let backend = backend();
    let conv = Convolver::new();
    let data = HostArray::ones(vec![100, 120, 140]).unwrap();
    let h = HostArray::ones(vec![10, 11, 12]).unwrap();

    let data2 = data.index_axis0(0).unwrap();
    let h2 = h.index_axis0(0).unwrap();
    let data1 = data2.index_axis0(0).unwrap();
    let h1 = h2.index_axis0(0).unwrap();

    // A constant field convolved with ones(K) is the constant times K.
    for (d, k, expected) in [
        (&data, &h, 1320.0f32),
        (&data2, &h2, 132.0),
        (&data1, &h1, 12.0),
    ] {
        let out = conv.convolve(d, k, Some(&backend)).unwrap();
        assert_eq!(out.shape(), d.shape());
        assert_eq!(out.element_type(), ElementType::Float32);
        let values = out.as_f32().unwrap();
        assert!(values.iter().all(|&v| (v - expected).abs() <= EPSILON * expected));
    }
}

// =============================================================================
// Edge clamp
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_constant_field_with_normalized_kernel() {
    let backend = backend();
    let conv = Convolver::new();
    let c = 3.25f32;
    for (shape, kshape) in [
        (vec![140], vec![12]),
        (vec![120, 140], vec![11, 12]),
        (vec![30, 20, 10], vec![5, 7, 9]),
        (vec![7, 5], vec![15, 3]),
    ] {
        let n: usize = kshape.iter().product();
        let data = HostArray::filled(shape.clone(), c).unwrap();
        let h = HostArray::filled(kshape, 1.0 / n as f32).unwrap();
        let out = conv.convolve(&data, &h, Some(&backend)).unwrap();
        assert_eq!(out.shape(), shape.as_slice());
        assert!(out
            .as_f32()
            .unwrap()
            .iter()
            .all(|&v| (v - c).abs() <= EPSILON * c));
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_edges_replicate_not_zero_pad() {
    let backend = backend();
    // Step signal: a zero-padded convolution would pull the ends towards 0.
    let data = HostArray::from_f32(vec![6], vec![5.0, 5.0, 5.0, 9.0, 9.0, 9.0]).unwrap();
    let h = HostArray::filled(vec![3], 1.0 / 3.0).unwrap();
    let out = Convolver::new().convolve(&data, &h, Some(&backend)).unwrap();
    let values = out.as_f32().unwrap();
    assert!((values[0] - 5.0).abs() < EPSILON);
    assert!((values[5] - 9.0).abs() < EPSILON);
}

// =============================================================================
// Reference parity
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_matches_host_reference() {
    let backend = backend();
    let conv = Convolver::new();
    for (seed, shape, kshape) in [
        (1, vec![257], vec![5]),
        (2, vec![33, 47], vec![4, 3]),
        (3, vec![9, 17, 13], vec![3, 2, 5]),
    ] {
        let data = random_array(shape.clone(), seed);
        let h = random_array(kshape.clone(), seed + 100);
        let expected = reference_convolve(
            data.as_f32().unwrap(),
            &shape,
            h.as_f32().unwrap(),
            &kshape,
        );
        let out = conv.convolve(&data, &h, Some(&backend)).unwrap();
        assert_approx_eq(out.as_f32().unwrap(), &expected, EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_uint16_every_rank_matches_reference() {
    let backend = backend();
    let conv = Convolver::new();
    for (seed, shape, kshape) in [
        (7, vec![37], vec![5]),
        (8, vec![24, 18], vec![3, 5]),
        (9, vec![3, 5, 7], vec![2, 3, 3]),
    ] {
        let len: usize = shape.iter().product();
        let values: Vec<u16> = (0..len).map(|i| (i * 37 % 1000) as u16).collect();
        let data = HostArray::from_u16(shape.clone(), values.clone()).unwrap();
        let h = random_array(kshape.clone(), seed);

        let out = conv.convolve(&data, &h, Some(&backend)).unwrap();
        assert_eq!(out.shape(), shape.as_slice());
        assert_eq!(out.element_type(), ElementType::Float32);

        let as_f32: Vec<f32> = values.iter().map(|&v| f32::from(v)).collect();
        let expected = reference_convolve(&as_f32, &shape, h.as_f32().unwrap(), &kshape);
        assert_approx_eq(out.as_f32().unwrap(), &expected, EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_converted_data_matches_float32() {
    let backend = backend();
    let conv = Convolver::new();
    let data = HostArray::new(vec![4, 4], ArrayData::Int32((0..16).collect())).unwrap();
    let h = HostArray::new(vec![3, 3], ArrayData::Float64(vec![0.5; 9])).unwrap();
    let out = conv.convolve(&data, &h, Some(&backend)).unwrap();

    let expected = reference_convolve(
        &(0..16).map(|v| v as f32).collect::<Vec<_>>(),
        &[4, 4],
        &[0.5; 9],
        &[3, 3],
    );
    assert_approx_eq(out.as_f32().unwrap(), &expected, EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_even_kernel_centred_at_half_extent() {
    let backend = backend();
    // Impulse at index 2, kernel [1, 2]: out[i] = h[0]·in[i + 1] + h[1]·in[i].
    let data = HostArray::from_f32(vec![5], vec![0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
    let h = HostArray::from_f32(vec![2], vec![1.0, 2.0]).unwrap();
    let out = Convolver::new().convolve(&data, &h, Some(&backend)).unwrap();
    assert_approx_eq(out.as_f32().unwrap(), &[0.0, 1.0, 2.0, 0.0, 0.0], EPSILON);
}

// =============================================================================
// Shape invariance
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_output_shape_independent_of_kernel() {
    let backend = backend();
    let conv = Convolver::new();
    let data = random_array(vec![16, 24], 11);
    for kshape in [vec![1, 1], vec![2, 9], vec![16, 24], vec![31, 40]] {
        let h = HostArray::ones(kshape).unwrap();
        let out = conv.convolve(&data, &h, Some(&backend)).unwrap();
        assert_eq!(out.shape(), &[16, 24]);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_inputs_not_mutated() {
    let backend = backend();
    let data = random_array(vec![12, 12], 5);
    let h = random_array(vec![3, 3], 6);
    let (data_before, h_before) = (data.clone(), h.clone());
    let _ = Convolver::new().convolve(&data, &h, Some(&backend)).unwrap();
    assert_eq!(data, data_before);
    assert_eq!(h, h_before);
}

#[test]
#[ignore = "Requires GPU"]
fn test_1d_length_bounded_by_2d_texture_limit() {
    let backend = backend();
    let conv = Convolver::new();
    let max = backend.limits().max_texture_dimension_2d as usize;
    let h = HostArray::ones(vec![3]).unwrap();

    let fits = HostArray::ones(vec![max]).unwrap();
    let out = conv.convolve(&fits, &h, Some(&backend)).unwrap();
    assert_eq!(out.shape(), &[max]);

    let too_long = HostArray::ones(vec![max + 1]).unwrap();
    assert!(matches!(
        conv.convolve(&too_long, &h, Some(&backend)),
        Err(ConvError::UnsupportedLimits(_))
    ));
}

// =============================================================================
// Shared backend
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_concurrent_calls_on_shared_backend() {
    let backend = backend();
    let conv = Convolver::new();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4u64)
            .map(|seed| {
                let (backend, conv) = (&backend, &conv);
                s.spawn(move || {
                    let data = random_array(vec![31, 29], seed);
                    let h = random_array(vec![3, 4], seed + 10);
                    let expected = reference_convolve(
                        data.as_f32().unwrap(),
                        &[31, 29],
                        h.as_f32().unwrap(),
                        &[3, 4],
                    );
                    for _ in 0..5 {
                        let out = conv.convolve(&data, &h, Some(backend)).unwrap();
                        assert_approx_eq(out.as_f32().unwrap(), &expected, EPSILON);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

// =============================================================================
// Program Builder on the bundled kernel
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_program_run_by_hand() {
    let backend = backend();
    let program = Program::build(&backend, CONVOLVE_WGSL, "").unwrap();

    let data = HostArray::from_f32(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let image = GpuImage::from_host(&backend, &data).unwrap();
    let weights = GpuTensor::upload(&backend, &[1.0], vec![1, 1]).unwrap();
    let output = GpuTensor::uninit(&backend, vec![2, 3]).unwrap();

    program
        .run(
            "convolve2d",
            &image.extents(),
            Some(&[8u32, 8][..]),
            &[
                KernelArg::Image(&image),
                KernelArg::Buffer(&weights),
                KernelArg::Buffer(&output),
                KernelArg::Int(2),
                KernelArg::Int(3),
                KernelArg::Int(1),
                KernelArg::Int(1),
            ],
        )
        .unwrap();
    assert_eq!(
        output.download(&backend).unwrap(),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
}

#[test]
#[ignore = "Requires GPU"]
fn test_program_errors() {
    let backend = backend();
    let program = Program::build(&backend, CONVOLVE_WGSL, "-D SHORTTYPE").unwrap();
    assert!(matches!(
        program.run("convolve4d", &[1], None, &[]),
        Err(ConvError::KernelNotFound { .. })
    ));
    assert!(matches!(
        program.run("convolve1d", &[4, 1], None, &[KernelArg::Int(4)]),
        Err(ConvError::KernelArguments(_))
    ));
    assert!(matches!(
        Program::build(&backend, "fn broken(", ""),
        Err(ConvError::Compile { .. })
    ));
}
