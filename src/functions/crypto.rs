// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg_f64_or, arg_str, function_table};
use rand::Rng;
use serde_json::{Value, json};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "md5" => md5_hex,
    "sha1" => sha1_hex,
    "sha256" => sha256_hex,
    "sha512" => sha512_hex,
    "random" => random,
    "uuid" => uuid,
];

fn md5_hex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(format!("{:x}", md5::compute(arg_str(args, 0)))))
}

fn digest_hex<D: Digest>(input: &str) -> String {
    hex::encode(D::digest(input.as_bytes()))
}

fn sha1_hex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(digest_hex::<Sha1>(&arg_str(args, 0))))
}

fn sha256_hex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(digest_hex::<Sha256>(&arg_str(args, 0))))
}

fn sha512_hex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(digest_hex::<Sha512>(&arg_str(args, 0))))
}

/// `random()` in `[0, 2^31)`, `random(max)` in `[0, max)`, `random(min, max)` in `[min, max)`.
fn random(args: &[Value]) -> Result<Value, String> {
    let (low, high) = match args.len() {
        0 => (0, i32::MAX as i64),
        1 => (0, arg_f64_or(args, 0, 0.0) as i64),
        _ => (arg_f64_or(args, 0, 0.0) as i64, arg_f64_or(args, 1, 0.0) as i64),
    };
    if high <= low {
        return Err(format!("empty range {}..{}", low, high));
    }
    Ok(json!(rand::thread_rng().gen_range(low..high)))
}

fn uuid(_args: &[Value]) -> Result<Value, String> {
    Ok(json!(uuid::Uuid::new_v4().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_match_known_vectors() {
        assert_eq!(md5_hex(&[json!("abc")]).unwrap(), json!("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(sha1_hex(&[json!("abc")]).unwrap(), json!("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert_eq!(
            sha256_hex(&[json!("abc")]).unwrap(),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn random_stays_in_range() {
        for _ in 0..50 {
            let n = random(&[json!(5), json!(8)]).unwrap().as_i64().unwrap();
            assert!((5..8).contains(&n));
        }
        assert!(random(&[json!(3), json!(3)]).is_err());
        assert_eq!(uuid(&[]).unwrap().as_str().map(str::len), Some(36));
    }
}
