//! Paired 16-bit checksum used by every redundant metadata block
//!
//! The card stores two sums next to each protected region: the wrapping sum
//! of all big-endian words, and the wrapping sum of their complements. A sum
//! that lands on 0xFFFF is stored as 0.

/// Checksum and inverse checksum over a sequence of host-order words
pub fn checksum_words<I>(words: I) -> (u16, u16)
where
    I: IntoIterator<Item = u16>,
{
    let mut sum = 0u16;
    let mut inverse = 0u16;

    for word in words {
        sum = sum.wrapping_add(word);
        inverse = inverse.wrapping_add(!word);
    }

    (normalize(sum), normalize(inverse))
}

/// Checksum and inverse checksum over big-endian bytes
///
/// A trailing odd byte is ignored; every covered region on the card is
/// word-aligned.
pub fn checksum(bytes: &[u8]) -> (u16, u16) {
    checksum_words(
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
    )
}

fn normalize(value: u16) -> u16 {
    if value == 0xFFFF {
        0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_region() {
        assert_eq!(checksum(&[]), (0, 0));
    }

    #[test]
    fn test_single_word() {
        // 0x1234 and its complement 0xEDCB
        assert_eq!(checksum(&[0x12, 0x34]), (0x1234, 0xEDCB));
    }

    #[test]
    fn test_sums_wrap() {
        let (sum, inverse) = checksum_words([0xFFF0, 0x0020]);
        assert_eq!(sum, 0x0010);
        assert_eq!(inverse, 0x000F_u16.wrapping_add(0xFFDF));
    }

    #[test]
    fn test_ffff_normalizes_to_zero() {
        // A single 0xFFFF word sums to 0xFFFF; its complement sums to 0
        assert_eq!(checksum_words([0xFFFF]), (0, 0));
        // A single zero word: inverse is 0xFFFF
        assert_eq!(checksum_words([0x0000]), (0, 0));
    }

    #[test]
    fn test_bytes_are_big_endian() {
        let (be, _) = checksum(&[0x00, 0x01]);
        assert_eq!(be, 1);
        let (swapped, _) = checksum(&[0x01, 0x00]);
        assert_eq!(swapped, 0x0100);
    }

    #[test]
    fn test_words_and_bytes_agree() {
        let words: Vec<u16> = (0..512u16).map(|i| i.wrapping_mul(0x9E37)).collect();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(checksum(&bytes), checksum_words(words));
    }
}
