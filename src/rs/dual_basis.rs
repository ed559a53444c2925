//! Conversion between the conventional and the CCSDS dual-basis (Berlekamp) symbol
//! representation used by the CCSDS (255,223) code.

const TAL: [u8; 8] = [0x8d, 0xef, 0xec, 0x86, 0xfa, 0x99, 0xaf, 0x7b];

const fn conventional_to_dual() -> [u8; 256] {
    let mut tab = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut k = 0;
        while k < 8 {
            if i & (1 << k) != 0 {
                tab[i] ^= TAL[7 - k];
            }
            k += 1;
        }
        i += 1;
    }
    tab
}

const fn dual_to_conventional() -> [u8; 256] {
    let mut tab = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        tab[TO_DUAL[i] as usize] = i as u8;
        i += 1;
    }
    tab
}

const TO_DUAL: [u8; 256] = conventional_to_dual();
const FROM_DUAL: [u8; 256] = dual_to_conventional();

/// Convert conventional symbols to dual-basis in place.
pub fn to_dual_basis(data: &mut [u8]) {
    for b in data.iter_mut() {
        *b = TO_DUAL[*b as usize];
    }
}

/// Convert dual-basis symbols to conventional in place.
pub fn from_dual_basis(data: &mut [u8]) {
    for b in data.iter_mut() {
        *b = FROM_DUAL[*b as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_inverse() {
        let mut data: Vec<u8> = (0..=255).collect();
        to_dual_basis(&mut data);
        from_dual_basis(&mut data);
        assert!(data.iter().enumerate().all(|(i, b)| i == *b as usize));
    }

    #[test]
    fn test_known_values() {
        let mut data = [0x00, 0x01, 0x80];
        to_dual_basis(&mut data);
        assert_eq!(data, [0x00, 0x7b, 0x8d]);
    }
}
