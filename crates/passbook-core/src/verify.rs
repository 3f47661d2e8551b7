//! Structural verification of finished pass archives.
//!
//! Re-hashes every entry and compares against `manifest.json`. The detached
//! signature is only checked for presence; validating the PKCS#7 blob needs
//! the signing toolchain.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use serde::Serialize;
use zip::ZipArchive;

use crate::digest::sha1_hex;
use crate::error::{PassError, PassResult};
use crate::pipeline::{MANIFEST_JSON, PASS_JSON, SIGNATURE};

/// Manifest digest that disagrees with the archived content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestMismatch {
    pub entry: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of [`verify_archive`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Entry names in archive order.
    pub entries: Vec<String>,
    pub manifest: BTreeMap<String, String>,
    pub mismatches: Vec<DigestMismatch>,
    /// Archived entries with no manifest digest.
    pub unlisted: Vec<String>,
    /// Manifest digests with no archived entry.
    pub missing: Vec<String>,
    pub signature_bytes: usize,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
            && self.unlisted.is_empty()
            && self.missing.is_empty()
            && self.signature_bytes > 0
    }
}

/// Verify a pass archive read from `reader`.
///
/// Structural problems (not a zip, no `pass.json`, no or unparsable
/// `manifest.json`, no `signature`) are errors. Digest disagreements are
/// reported, not raised.
pub fn verify_archive<R: Read + Seek>(reader: R) -> PassResult<VerifyReport> {
    let mut zip = ZipArchive::new(reader).map_err(|e| PassError::InvalidArchive {
        reason: e.to_string(),
    })?;

    let mut contents: Vec<(String, Vec<u8>)> = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| PassError::InvalidArchive {
                reason: format!("reading {name}: {e}"),
            })?;
        contents.push((name, buf));
    }

    let find = |name: &str| {
        contents
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.as_slice())
    };

    if find(PASS_JSON).is_none() {
        return Err(missing_entry(PASS_JSON));
    }
    let manifest_bytes = find(MANIFEST_JSON).ok_or_else(|| missing_entry(MANIFEST_JSON))?;
    let signature = find(SIGNATURE).ok_or_else(|| missing_entry(SIGNATURE))?;

    let manifest: BTreeMap<String, String> =
        serde_json::from_slice(manifest_bytes).map_err(|e| PassError::InvalidArchive {
            reason: format!("{MANIFEST_JSON} is not a digest map: {e}"),
        })?;

    let mut report = VerifyReport {
        entries: contents.iter().map(|(n, _)| n.clone()).collect(),
        signature_bytes: signature.len(),
        ..Default::default()
    };

    for (name, bytes) in &contents {
        if name == MANIFEST_JSON || name == SIGNATURE {
            continue;
        }
        let actual = sha1_hex(bytes);
        match manifest.get(name) {
            None => report.unlisted.push(name.clone()),
            Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
                report.mismatches.push(DigestMismatch {
                    entry: name.clone(),
                    expected: expected.clone(),
                    actual,
                })
            }
            Some(_) => {}
        }
    }

    report.missing = manifest
        .keys()
        .filter(|name| find(name.as_str()).is_none())
        .cloned()
        .collect();
    report.manifest = manifest;

    Ok(report)
}

fn missing_entry(name: &str) -> PassError {
    PassError::InvalidArchive {
        reason: format!("missing {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn manifest(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let map: BTreeMap<&str, String> = entries
            .iter()
            .map(|(name, bytes)| (*name, sha1_hex(bytes)))
            .collect();
        serde_json::to_vec(&map).unwrap()
    }

    #[test]
    fn consistent_archive_passes() {
        let files: &[(&str, &[u8])] = &[("pass.json", &b"{}"[..]), ("icon.png", &b"png"[..])];
        let manifest = manifest(files);
        let archive = zip_of(&[
            files[0],
            files[1],
            ("manifest.json", manifest.as_slice()),
            ("signature", &b"sig"[..]),
        ]);

        let report = verify_archive(Cursor::new(archive)).unwrap();
        assert!(report.is_ok(), "{report:?}");
        assert_eq!(report.entries.len(), 4);
        assert_eq!(report.manifest.len(), 2);
    }

    #[test]
    fn tampered_and_unlisted_entries_reported() {
        let manifest = manifest(&[("pass.json", &b"{}"[..]), ("logo.png", &b"logo"[..])]);
        let archive = zip_of(&[
            ("pass.json", &b"{\"x\":1}"[..]),
            ("strip.png", &b"strip"[..]),
            ("manifest.json", manifest.as_slice()),
            ("signature", &b"sig"[..]),
        ]);

        let report = verify_archive(Cursor::new(archive)).unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].entry, "pass.json");
        assert_eq!(report.unlisted, ["strip.png"]);
        assert_eq!(report.missing, ["logo.png"]);
    }

    #[test]
    fn structural_problems_are_errors() {
        let err = verify_archive(Cursor::new(b"not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, PassError::InvalidArchive { .. }));

        let manifest = manifest(&[("pass.json", &b"{}"[..])]);
        let unsigned = zip_of(&[("pass.json", &b"{}"[..]), ("manifest.json", manifest.as_slice())]);
        let err = verify_archive(Cursor::new(unsigned)).unwrap_err();
        assert_eq!(err.to_string(), "invalid pass archive: missing signature");
    }
}
