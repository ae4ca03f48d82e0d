use deep_watermark::message::{bit_error_rate, random_messages, MessageExpander};
use ndarray::{s, Array2};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_random_messages_are_bits() {
    let mut rng = StdRng::seed_from_u64(42);
    let messages = random_messages(16, 30, &mut rng);
    assert_eq!(messages.dim(), (16, 30));
    assert!(messages.iter().all(|&b| b == 0.0 || b == 1.0));

    let ones = messages.iter().filter(|&&b| b == 1.0).count();
    assert!(ones > 100 && ones < 380, "{} of 480 bits set", ones);
}

#[test]
fn test_bit_error_rate_extremes() {
    let mut rng = StdRng::seed_from_u64(9);
    let message = random_messages(4, 30, &mut rng);
    let inverted = message.mapv(|b| 1.0 - b);

    assert_eq!(bit_error_rate(message.view(), message.view()).unwrap(), 0.0);
    assert_eq!(bit_error_rate(inverted.view(), message.view()).unwrap(), 1.0);
}

#[test]
fn test_bit_error_rate_shape_mismatch() {
    let a = Array2::<f32>::zeros((2, 8));
    let b = Array2::<f32>::zeros((2, 9));
    assert!(bit_error_rate(a.view(), b.view()).is_err());
}

#[test]
fn test_expander_rejects_wrong_length() {
    let expander = MessageExpander::new(8);
    let message = Array2::<f32>::zeros((1, 7));
    assert!(expander.expand(message.view(), 4, 4).is_err());
}

proptest! {
    #[test]
    fn expanded_message_is_constant_per_channel(
        bits in proptest::collection::vec(0u8..2, 1..24),
        height in 1usize..6,
        width in 1usize..6,
    ) {
        let length = bits.len();
        let message = Array2::from_shape_fn((1, length), |(_, i)| f32::from(bits[i]));
        let expanded = MessageExpander::new(length).expand(message.view(), height, width).unwrap();
        prop_assert_eq!(expanded.shape(), &[1, length, height, width]);
        for (i, &bit) in bits.iter().enumerate() {
            prop_assert!(expanded.slice(s![0, i, .., ..]).iter().all(|&v| v == f32::from(bit)));
        }
    }

    #[test]
    fn bit_error_rate_counts_flipped_bits(
        bits in proptest::collection::vec(0u8..2, 1..64),
        flips in proptest::collection::vec(any::<bool>(), 64),
    ) {
        let length = bits.len();
        let message = Array2::from_shape_fn((1, length), |(_, i)| f32::from(bits[i]));
        let decoded = Array2::from_shape_fn((1, length), |(_, i)| {
            let bit = f32::from(bits[i]);
            // decoder outputs are not clamped; anything past 0.5 rounds to the other bit
            if flips[i] { 1.2 - bit * 1.4 } else { bit * 0.8 + 0.1 }
        });
        let expected = flips[..length].iter().filter(|&&f| f).count() as f64 / length as f64;
        let rate = bit_error_rate(decoded.view(), message.view()).unwrap();
        prop_assert!((rate - expected).abs() < 1e-12);
    }
}
