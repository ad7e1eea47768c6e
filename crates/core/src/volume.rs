//! Input volume formats and format detection.
//!
//! Parsing is done by the external volume loader; this module only tells
//! the formats apart so the loader and renderer can be told what they are
//! receiving.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Offset of the `DICM` preamble marker in a DICOM Part 10 file.
const DICOM_MAGIC_OFFSET: usize = 128;

/// Offset of the magic string in a single-file NIfTI-1 header.
const NIFTI_MAGIC_OFFSET: usize = 344;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFormat {
    Dicom,
    Nrrd,
    Nifti,
}

impl VolumeFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dicom => "dicom",
            Self::Nrrd => "nrrd",
            Self::Nifti => "nifti",
        }
    }

    /// Guess the format from a file name (`.dcm`, `.nrrd`, `.nhdr`, `.nii`, `.nii.gz`).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".nii") || lower.ends_with(".nii.gz") {
            Some(Self::Nifti)
        } else if lower.ends_with(".nrrd") || lower.ends_with(".nhdr") {
            Some(Self::Nrrd)
        } else if lower.ends_with(".dcm") || lower.ends_with(".dicom") {
            Some(Self::Dicom)
        } else {
            None
        }
    }

    /// Identify an uncompressed volume by its magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"NRRD") {
            return Some(Self::Nrrd);
        }
        if bytes.get(DICOM_MAGIC_OFFSET..DICOM_MAGIC_OFFSET + 4) == Some(b"DICM".as_slice()) {
            return Some(Self::Dicom);
        }
        match bytes.get(NIFTI_MAGIC_OFFSET..NIFTI_MAGIC_OFFSET + 4) {
            Some(b"n+1\0") | Some(b"ni1\0") => Some(Self::Nifti),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dicom" => Ok(Self::Dicom),
            "nrrd" => Ok(Self::Nrrd),
            "nifti" => Ok(Self::Nifti),
            other => Err(CoreError::Validation(format!(
                "Unknown volume format '{other}'. Must be one of: dicom, nrrd, nifti"
            ))),
        }
    }
}
