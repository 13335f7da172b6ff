//! Stateless computations triggered by the compute signal.

use crate::region::SPELL_CAPACITY;
use crate::region::views::{AttackerView, CasterView, SpellInput};

const ALPHABET: u8 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("non-ASCII byte {byte:#04x} at payload index {index}")]
    NonAscii { index: usize, byte: u8 },
}

/// Barbarian: copy the enemy's health into the attack field.
pub fn attack(view: AttackerView<'_>) -> i32 {
    let value = view.enemy_health();
    view.set_attack(value);
    value
}

/// Wizard: decrypt the spell into the output field.
///
/// On rejection the output is zeroed so no partial plaintext is left behind.
pub fn dispel(view: CasterView<'_>) -> Result<(), CipherError> {
    match decrypt(&view.spell_input()) {
        Ok(plaintext) => {
            view.write_output(&plaintext);
            Ok(())
        }
        Err(e) => {
            view.write_output(&[0; SPELL_CAPACITY]);
            Err(e)
        }
    }
}

fn shift_letter(byte: u8, shift: u8) -> u8 {
    let base = match byte {
        b'a'..=b'z' => b'a',
        b'A'..=b'Z' => b'A',
        _ => return byte,
    };
    (byte - base + shift) % ALPHABET + base
}

/// Shift every letter of the payload back by `input[0] mod 26`.
///
/// Non-letter ASCII bytes (including NUL padding) pass through unchanged.
pub fn decrypt(input: &SpellInput) -> Result<[u8; SPELL_CAPACITY], CipherError> {
    let back = ALPHABET - input[0] % ALPHABET;
    let mut output = [0; SPELL_CAPACITY];
    for (index, (&byte, out)) in input[1..].iter().zip(output.iter_mut()).enumerate() {
        if !byte.is_ascii() {
            return Err(CipherError::NonAscii { index, byte });
        }
        *out = shift_letter(byte, back);
    }
    Ok(output)
}

/// Inverse of [`decrypt`]: shift letters forward by `key mod 26`.
pub fn caesar_encrypt(key: u8, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let forward = key % ALPHABET;
    plaintext
        .iter()
        .enumerate()
        .map(|(index, &byte)| {
            if byte.is_ascii() {
                Ok(shift_letter(byte, forward))
            } else {
                Err(CipherError::NonAscii { index, byte })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::DungeonLayout;

    fn spell(key: u8, payload: &[u8]) -> SpellInput {
        let mut input = [0; SPELL_CAPACITY + 1];
        input[0] = key;
        input[1..=payload.len()].copy_from_slice(payload);
        input
    }

    #[test]
    fn attack_copies_health() {
        let layout = DungeonLayout::zeroed();
        layout.game().set_enemy_health(42);
        assert_eq!(attack(layout.attacker()), 42);
        assert_eq!(layout.game().attack(), 42);
    }

    #[test]
    fn decrypt_wraps_within_case() {
        let out = decrypt(&spell(1, b"aBz")).unwrap();
        assert_eq!(&out[..3], b"zAy");
    }

    #[test]
    fn non_letters_pass_through() {
        let out = decrypt(&spell(5, b"7 ,!")).unwrap();
        assert_eq!(&out[..4], b"7 ,!");
        assert!(out[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn key_byte_is_unsigned() {
        // 200 mod 26 == 18
        let cipher = caesar_encrypt(200, b"Open Sesame").unwrap();
        let out = decrypt(&spell(200, &cipher)).unwrap();
        assert_eq!(&out[..11], b"Open Sesame");
        assert_eq!(caesar_encrypt(200, b"a").unwrap(), b"s");
    }

    #[test]
    fn key_multiple_of_alphabet_is_identity() {
        let out = decrypt(&spell(52, b"Dragon")).unwrap();
        assert_eq!(&out[..6], b"Dragon");
    }

    #[test]
    fn dispel_round_trips_through_the_region() {
        let layout = DungeonLayout::zeroed();
        let plaintext = b"The treasure lies beyond the gate";
        let cipher = caesar_encrypt(13, plaintext).unwrap();
        layout.game().write_spell(13, &cipher);

        dispel(layout.caster()).unwrap();
        let out = layout.game().spell_output();
        assert_eq!(&out[..plaintext.len()], plaintext);
    }

    #[test]
    fn non_ascii_payload_zeroes_output() {
        let layout = DungeonLayout::zeroed();
        layout.caster().write_output(&[b'x'; SPELL_CAPACITY]);
        layout.game().write_spell(3, &[b'a', 0xC3, b'b']);

        let err = dispel(layout.caster()).unwrap_err();
        assert_eq!(err, CipherError::NonAscii { index: 1, byte: 0xC3 });
        assert_eq!(layout.game().spell_output(), [0; SPELL_CAPACITY]);
    }

    #[test]
    fn encrypt_rejects_non_ascii() {
        assert!(caesar_encrypt(3, "héllo".as_bytes()).is_err());
    }
}
