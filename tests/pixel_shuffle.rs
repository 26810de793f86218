use std::sync::Arc;

use rand::Rng;
use subpixel::layers::{DataFormat, Layer, PixelShuffle, PixelShuffleConfig};
use subpixel::layout::Stage;
use subpixel::ops::texture::HostDevice;
use subpixel::{Error, Shape, Tensor};

fn iota(dims: &[usize]) -> Tensor<f32> {
    let len = dims.iter().product::<usize>();
    Tensor::new(dims.to_vec(), (0..len).map(|v| v as f32).collect())
}

fn random(dims: &[usize]) -> Tensor<f32> {
    let mut rng = rand::rng();
    let len = dims.iter().product::<usize>();
    Tensor::new(dims.to_vec(), (0..len).map(|_| rng.random_range(-1.0..1.0)).collect())
}

const SHUFFLED_2X2X8: [f32; 32] = [
    0., 1., 2., 3., 8., 9., 10., 11., //
    4., 5., 6., 7., 12., 13., 14., 15., //
    16., 17., 18., 19., 24., 25., 26., 27., //
    20., 21., 22., 23., 28., 29., 30., 31.,
];

#[test]
fn shuffles_index_encoded_input() {
    let mut layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
    let out = layer.apply(&iota(&[2, 2, 8])).unwrap();
    assert_eq!(out.shape().dims(), &[4, 4, 2]);
    assert_eq!(out.data(), &SHUFFLED_2X2X8);
}

#[test]
fn device_path_matches_precomputed_layout() {
    let device = Arc::new(HostDevice::new());
    let mut layer = PixelShuffle::with_device(PixelShuffleConfig::new(2), Arc::clone(&device)).unwrap();
    let out = layer.apply(&iota(&[2, 2, 8])).unwrap();
    assert_eq!(out.data(), &SHUFFLED_2X2X8);
    assert_eq!(device.passes(), 3);
}

#[test]
fn drops_channels_beyond_the_last_full_block() {
    let mut layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
    let out = layer.apply(&iota(&[4, 4, 10])).unwrap();
    assert_eq!(out.shape().dims(), &[8, 8, 2]);
    // Input values encode their flat index; channels 8 and 9 never appear.
    assert!(out.data().iter().all(|&v| (v as usize) % 10 < 8));
    assert_eq!(&out.data()[..4], &[0., 1., 2., 3.]);
}

#[test]
fn rejects_unsupported_ranks() {
    let mut layer = PixelShuffle::new(PixelShuffleConfig::default()).unwrap();
    let err = layer.apply(&iota(&[4, 8])).unwrap_err();
    assert!(matches!(err, Error::InvalidRank { rank: 2, .. }));
    let err = layer.apply(&iota(&[1, 1, 1, 1, 4])).unwrap_err();
    assert!(matches!(err, Error::InvalidRank { rank: 5, .. }));
}

#[test]
fn batch_axis_is_carried_through() {
    let mut layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
    let out = layer.apply(&iota(&[2, 2, 2, 8])).unwrap();
    assert_eq!(out.shape().dims(), &[2, 4, 4, 2]);
    let (first, second) = out.data().split_at(32);
    assert_eq!(first, &SHUFFLED_2X2X8);
    for (a, b) in first.iter().zip(second) {
        assert_eq!(a + 32.0, *b);
    }
}

#[test]
fn cpu_and_device_agree_exactly() {
    let device = Arc::new(HostDevice::with_max_side(64));
    let cases: [(&[usize], usize, DataFormat); 5] = [
        (&[3, 5, 12], 2, DataFormat::ChannelsLast),
        (&[9, 4, 6], 3, DataFormat::ChannelsFirst),
        (&[2, 3, 3, 7], 1, DataFormat::ChannelsLast),
        (&[2, 20, 3, 5], 2, DataFormat::ChannelsFirst),
        // Forces packed textures: the output rows are 80 texels wide.
        (&[4, 40, 8], 2, DataFormat::ChannelsLast),
    ];
    for (dims, factor, format) in cases {
        let config = PixelShuffleConfig::new(factor).data_format(format);
        let x = random(dims);
        let mut cpu = PixelShuffle::new(config).unwrap();
        let mut gpu = PixelShuffle::with_device(config, Arc::clone(&device)).unwrap();
        assert_eq!(cpu.apply(&x).unwrap(), gpu.apply(&x).unwrap(), "{dims:?} {format}");
    }
}

#[test]
fn maps_are_built_once_per_shape() {
    let device = Arc::new(HostDevice::new());
    let mut layer = PixelShuffle::with_device(PixelShuffleConfig::new(2), Arc::clone(&device)).unwrap();
    let x = random(&[3, 3, 8]);
    let plan = layer.plan(x.shape()).unwrap();

    let first = layer.apply(&x).unwrap();
    assert_eq!(layer.map_builds(), 3);
    let map = layer.executor().unwrap().cached_map(&plan, Stage::Permute).unwrap();
    // Three maps plus two intermediates stay resident.
    assert_eq!(device.live_textures(), 5);

    let second = layer.apply(&x).unwrap();
    assert_eq!(first, second);
    assert_eq!(layer.map_builds(), 3);
    let again = layer.executor().unwrap().cached_map(&plan, Stage::Permute).unwrap();
    assert_eq!(map, again);

    layer.apply(&random(&[5, 2, 4])).unwrap();
    assert_eq!(layer.map_builds(), 6);
    assert_eq!(device.live_textures(), 5);
    assert!(layer.executor().unwrap().cached_map(&plan, Stage::Permute).is_none());
}

#[test]
fn failed_validation_allocates_nothing() {
    let device = Arc::new(HostDevice::new());
    let mut layer = PixelShuffle::with_device(PixelShuffleConfig::new(3), Arc::clone(&device)).unwrap();
    assert!(layer.apply(&random(&[2, 2, 8])).is_err());
    assert_eq!(device.uploads(), 0);
    assert_eq!(device.live_textures(), 0);
    assert_eq!(layer.map_builds(), 0);
}

#[test]
fn description_names_size_and_format() {
    let layer = PixelShuffle::new(PixelShuffleConfig::new((2, 3))).unwrap();
    assert_eq!(layer.description(), "size 2x3 data format channels_last");
    assert_eq!(layer.class_name(), "PixelShuffle");
    assert_eq!(
        layer.output_shape(&Shape::new([1, 4, 4, 12]).unwrap()).unwrap().dims(),
        &[1, 8, 12, 2]
    );
}

#[test]
fn default_backend_runs_on_the_host() {
    let mut layer = PixelShuffle::from_backend(PixelShuffleConfig::new(2)).unwrap();
    assert!(layer.executor().is_none());
    assert_eq!(layer.apply(&iota(&[2, 2, 8])).unwrap().data(), &SHUFFLED_2X2X8);
}
