use std::sync::Arc;

use rand::Rng;
use subpixel::layers::{Layer, PRelu, PixelShuffle, PixelShuffleConfig};
use subpixel::ops::texture::{HostDevice, Resident};
use subpixel::{Error, Tensor, tensor};

fn reference(x: f32, a: f32) -> f32 {
    if x >= 0.0 { x } else { a * x }
}

#[test]
fn alpha_row_is_tiled_over_rows() {
    let mut layer = PRelu::new();
    layer
        .set_weight("alpha", tensor!([[0.1, 0.2, 0.3, 0.4]]))
        .unwrap();
    let x = tensor!([
        [-1.0, -2.0, -3.0, -4.0],
        [1.0, -1.0, 2.0, -2.0],
        [0.0, 5.0, -10.0, 10.0]
    ]);
    let y = layer.apply(&x).unwrap();
    assert_eq!(y.shape().dims(), &[3, 4]);
    let alpha = [0.1f32, 0.2, 0.3, 0.4];
    for (i, (&out, &v)) in y.data().iter().zip(x.data()).enumerate() {
        assert_eq!(out, reference(v, alpha[i % 4]));
    }
}

#[test]
fn cpu_and_device_agree_within_tolerance() {
    let mut rng = rand::rng();
    let device = Arc::new(HostDevice::new());
    let dims = [2, 5, 6, 3];
    let len = dims.iter().product::<usize>();
    let x = Tensor::new(dims.to_vec(), (0..len).map(|_| rng.random_range(-4.0..4.0)).collect());
    let alpha = Tensor::new(vec![1, 1, 6, 1], (0..6).map(|_| rng.random_range(0.0..1.0)).collect());

    let mut cpu = PRelu::new();
    let mut gpu = PRelu::with_device(Arc::clone(&device));
    cpu.set_weight("alpha", alpha.clone()).unwrap();
    gpu.set_weight("alpha", alpha).unwrap();

    let a = cpu.apply(&x).unwrap();
    let b = gpu.apply(&x).unwrap();
    assert_eq!(a.shape(), b.shape());
    for (p, q) in a.data().iter().zip(b.data()) {
        assert!((p - q).abs() <= 1e-6, "{p} vs {q}");
    }
}

#[test]
fn reloading_alpha_invalidates_the_cache() {
    let mut layer = PRelu::new();
    let x = tensor!([[-2.0, -2.0]]);
    layer.set_weight("alpha", tensor!([0.5])).unwrap();
    assert_eq!(layer.apply(&x).unwrap().data(), &[-1.0, -1.0]);
    layer.set_weight("alpha", tensor!([0.25])).unwrap();
    assert_eq!(layer.apply(&x).unwrap().data(), &[-0.5, -0.5]);
}

#[test]
fn untileable_alpha_is_a_shape_error() {
    let mut layer = PRelu::new();
    layer.set_weight("alpha", tensor!([0.1, 0.2, 0.3])).unwrap();
    let err = layer.apply(&tensor!([[1.0, 2.0], [3.0, 4.0]])).unwrap_err();
    assert!(matches!(err, Error::Untileable { .. }));
}

#[test]
fn resident_output_feeds_the_next_layer() {
    let device = Arc::new(HostDevice::new());
    let mut act = PRelu::with_device(Arc::clone(&device));
    act.set_weight("alpha", tensor!([0.5])).unwrap();
    act.set_has_consumers(true);
    let mut up = PixelShuffle::with_device(PixelShuffleConfig::new(2), Arc::clone(&device)).unwrap();

    let x = Tensor::new(vec![1, 1, 4], vec![-2.0, 4.0, -6.0, 8.0]);
    let mid = act.call(&Resident::Host(x)).unwrap();
    assert!(!mid.is_host());
    let uploads = device.uploads();
    let out = up.call(&mid).unwrap();
    assert_eq!(device.uploads(), uploads + 3);
    match out {
        Resident::Host(t) => {
            assert_eq!(t.shape().dims(), &[2, 2, 1]);
            assert_eq!(t.data(), &[-1.0, 4.0, -3.0, 8.0]);
        }
        Resident::Device(_) => panic!("expected a host result"),
    }
}
