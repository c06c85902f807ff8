//! Album metadata records.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// Release information as found in the metadata: a bare year or a date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReleaseDate {
    /// Numeric year.
    Year(f64),
    /// Date such as `1999-05-01` or `1999`.
    Date(String),
}

impl ReleaseDate {
    /// Release year, if it can be read.
    pub fn year(&self) -> Option<f32> {
        match self {
            Self::Year(y) if y.is_finite() => Some(*y as f32),
            Self::Year(_) => None,
            Self::Date(s) => s.get(..4).and_then(|y| y.parse::<i32>().ok()).map(|y| y as f32),
        }
    }
}

/// One album of the cover dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverRecord {
    /// Path of the 64x64 cover.
    #[serde(default)]
    pub file_path_64: Option<String>,
    /// Path of the 300x300 cover.
    #[serde(default)]
    pub file_path_300: Option<String>,
    /// Release date.
    #[serde(default)]
    pub album_release: Option<ReleaseDate>,
    /// Artist.
    #[serde(default)]
    pub artist_name: Option<String>,
    /// Album title.
    #[serde(default)]
    pub album_name: Option<String>,
    /// Genre of the artist.
    #[serde(default)]
    pub artist_genre: Option<String>,
}

impl CoverRecord {
    /// Image path for the given source size (64 or 300).
    pub fn file_path(&self, source_size: u32) -> Option<&str> {
        if source_size <= 64 {
            self.file_path_64.as_deref()
        } else {
            self.file_path_300.as_deref()
        }
    }

    /// Release year, if present and readable.
    pub fn release_year(&self) -> Option<f32> {
        self.album_release.as_ref().and_then(ReleaseDate::year)
    }

    /// Short human-readable caption.
    pub fn caption(&self) -> String {
        let artist = self.artist_name.as_deref().unwrap_or("unknown artist");
        let album = self.album_name.as_deref().unwrap_or("untitled");
        match self.release_year() {
            Some(year) => format!("{} - {} ({})", artist, album, year as i32),
            None => format!("{} - {}", artist, album),
        }
    }
}

/// Read every record of a JSON-lines file, skipping blank lines.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<CoverRecord>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: CoverRecord = serde_json::from_str(&line).map_err(|e| DataError::Parse {
            line: line_num + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}
