// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Password hashing for user customizations.
//!
//! Passwords that already look like crypt(3) strings are passed through;
//! anything else is hashed with SHA-512-crypt (`$6$`).

use anyhow::Result;
use rand::Rng;
use sha2::{Digest, Sha512};

const SALT_ALPHABET: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SALT_LEN: usize = 16;
const ROUNDS: usize = 5000;
const CRYPTED_PREFIXES: &[&str] = &["$2b$", "$5$", "$6$"];

/// Byte order in which the final digest is emitted, three bytes per group.
const ENCODE_ORDER: [(usize, usize, usize); 21] = [
    (0, 21, 42),
    (22, 43, 1),
    (44, 2, 23),
    (3, 24, 45),
    (25, 46, 4),
    (47, 5, 26),
    (6, 27, 48),
    (28, 49, 7),
    (50, 8, 29),
    (9, 30, 51),
    (31, 52, 10),
    (53, 11, 32),
    (12, 33, 54),
    (34, 55, 13),
    (56, 14, 35),
    (15, 36, 57),
    (37, 58, 16),
    (59, 17, 38),
    (18, 39, 60),
    (40, 61, 19),
    (62, 20, 41),
];

/// Whether `s` is already a crypt(3) string we accept verbatim.
pub fn is_crypted(s: &str) -> bool {
    CRYPTED_PREFIXES.iter().any(|p| s.starts_with(p))
}

/// The password hashing capability.
pub trait Crypter {
    /// Hash `password` with the given salt, returning a full crypt string.
    fn crypt(&self, password: &str, salt: &str) -> Result<String>;

    fn is_crypted(&self, s: &str) -> bool {
        is_crypted(s)
    }
}

/// SHA-512-crypt as specified by Ulrich Drepper, with the default 5000 rounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha512Crypt;

fn repeat_to(digest: &[u8], len: usize) -> Vec<u8> {
    digest.iter().copied().cycle().take(len).collect()
}

fn b64_push(out: &mut String, mut w: u32, n: usize) {
    for _ in 0..n {
        out.push(SALT_ALPHABET[(w & 0x3f) as usize] as char);
        w >>= 6;
    }
}

impl Crypter for Sha512Crypt {
    fn crypt(&self, password: &str, salt: &str) -> Result<String> {
        let pw = password.as_bytes();
        let salt = &salt.as_bytes()[..salt.len().min(SALT_LEN)];
        anyhow::ensure!(
            salt.iter().all(|c| SALT_ALPHABET.contains(c)),
            "invalid characters in salt"
        );

        let b = Sha512::new()
            .chain_update(pw)
            .chain_update(salt)
            .chain_update(pw)
            .finalize();

        let mut a = Sha512::new().chain_update(pw).chain_update(salt);
        a.update(repeat_to(&b, pw.len()));
        let mut n = pw.len();
        while n > 0 {
            if n & 1 == 1 {
                a.update(b);
            } else {
                a.update(pw);
            }
            n >>= 1;
        }
        let a = a.finalize();

        let mut dp = Sha512::new();
        for _ in 0..pw.len() {
            dp.update(pw);
        }
        let p = repeat_to(&dp.finalize(), pw.len());

        let mut ds = Sha512::new();
        for _ in 0..(16 + a[0] as usize) {
            ds.update(salt);
        }
        let s = repeat_to(&ds.finalize(), salt.len());

        let mut c = a.to_vec();
        for i in 0..ROUNDS {
            let mut h = Sha512::new();
            if i & 1 == 1 {
                h.update(&p);
            } else {
                h.update(&c);
            }
            if i % 3 != 0 {
                h.update(&s);
            }
            if i % 7 != 0 {
                h.update(&p);
            }
            if i & 1 == 1 {
                h.update(&c);
            } else {
                h.update(&p);
            }
            c = h.finalize().to_vec();
        }

        let mut out = String::with_capacity(3 + salt.len() + 1 + 86);
        out.push_str("$6$");
        out.push_str(std::str::from_utf8(salt)?);
        out.push('$');
        for (x, y, z) in ENCODE_ORDER {
            let w = (u32::from(c[x]) << 16) | (u32::from(c[y]) << 8) | u32::from(c[z]);
            b64_push(&mut out, w, 4);
        }
        b64_push(&mut out, u32::from(c[63]), 2);
        Ok(out)
    }
}

/// Generate a 16 character salt from `[A-Za-z0-9./]`.
pub fn gen_salt<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SALT_LEN)
        .map(|_| SALT_ALPHABET[rng.random_range(0..SALT_ALPHABET.len())] as char)
        .collect()
}

/// Return `password` unchanged if it is already crypted, otherwise hash it
/// with a fresh salt drawn from `rng`.
pub fn crypt_if_needed<R: Rng + ?Sized>(
    crypter: &dyn Crypter,
    password: &str,
    rng: &mut R,
) -> Result<String> {
    if crypter.is_crypted(password) {
        return Ok(password.to_string());
    }
    let salt = gen_salt(rng);
    crypter.crypt(password, &salt)
}
