use std::sync::Arc;

use proptest::prelude::*;
use subpixel::layers::{DataFormat, Layer, PixelShuffle, PixelShuffleConfig};
use subpixel::layout::{Permutation, StridedView, build_permute_map};
use subpixel::ops::cpu::gather_view;
use subpixel::ops::texture::HostDevice;
use subpixel::{Shape, Tensor};

fn arb_format() -> impl Strategy<Value = DataFormat> {
    prop_oneof![Just(DataFormat::ChannelsLast), Just(DataFormat::ChannelsFirst)]
}

/// Sample dims for a shuffle input with `channels` channels.
fn sample_dims(format: DataFormat, h: usize, w: usize, channels: usize) -> Vec<usize> {
    match format {
        DataFormat::ChannelsLast => vec![h, w, channels],
        DataFormat::ChannelsFirst => vec![channels, h, w],
    }
}

fn arb_permutation(rank: usize) -> impl Strategy<Value = Permutation> {
    Just((0..rank).collect::<Vec<_>>())
        .prop_shuffle()
        .prop_map(|axes| Permutation::new(axes).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shuffle_then_unshuffle_is_identity(
        h in 1usize..5,
        w in 1usize..5,
        rh in 1usize..4,
        rw in 1usize..4,
        oc in 1usize..4,
        batch in prop::option::of(1usize..3),
        format in arb_format(),
    ) {
        let mut dims = sample_dims(format, h, w, rh * rw * oc);
        if let Some(n) = batch {
            dims.insert(0, n);
        }
        let len = dims.iter().product::<usize>();
        let x = Tensor::new(dims, (0..len).map(|v| v as f32).collect());

        let config = PixelShuffleConfig::new((rh, rw)).data_format(format);
        let mut up = PixelShuffle::new(config).unwrap();
        let mut down = PixelShuffle::new(config.inverse()).unwrap();
        let y = up.apply(&x).unwrap();
        prop_assert_eq!(down.apply(&y).unwrap(), x);
    }

    #[test]
    fn host_device_matches_cpu(
        h in 1usize..6,
        w in 1usize..6,
        r in 1usize..4,
        channels in 1usize..20,
        format in arb_format(),
        inverse in any::<bool>(),
    ) {
        let (dims, config) = if inverse {
            let dims = sample_dims(format, h * r, w * r, channels);
            (dims, PixelShuffleConfig::new(r).data_format(format).inverse())
        } else {
            prop_assume!(channels >= r * r);
            (sample_dims(format, h, w, channels), PixelShuffleConfig::new(r).data_format(format))
        };
        let len = dims.iter().product::<usize>();
        let x = Tensor::new(dims, (0..len).map(|v| v as f32 * 0.5 - 3.0).collect());

        let device = Arc::new(HostDevice::with_max_side(96));
        let mut cpu = PixelShuffle::new(config).unwrap();
        let mut gpu = PixelShuffle::with_device(config, device).unwrap();
        prop_assert_eq!(cpu.apply(&x).unwrap(), gpu.apply(&x).unwrap());
    }

    #[test]
    fn strided_walk_matches_permute_map(
        dims in prop::collection::vec(1usize..5, 2..=5),
        seed in any::<u64>(),
    ) {
        let rank = dims.len();
        let mut axes: Vec<usize> = (0..rank).collect();
        // Deterministic shuffle from the seed.
        let mut s = seed;
        for i in (1..rank).rev() {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            axes.swap(i, (s >> 33) as usize % (i + 1));
        }
        let perm = Permutation::new(axes).unwrap();
        let shape = Shape::new(dims).unwrap();
        let src: Vec<i32> = (0..shape.len() as i32).collect();

        let map = build_permute_map(&shape, &perm).unwrap();
        let walked = gather_view(&src, &StridedView::contiguous(shape.dims()).permuted(&perm));
        prop_assert_eq!(walked.as_slice(), map.values());
    }

    #[test]
    fn permutation_inverse_round_trips(perm in arb_permutation(5)) {
        let dims = [2usize, 3, 5, 7, 11];
        prop_assert_eq!(perm.inverse().apply(&perm.apply(&dims)), dims.to_vec());
    }
}
