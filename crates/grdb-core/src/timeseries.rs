//! # Time-Series Parser
//!
//! Incremental parser for remote spectrum files: one `x y` pair of
//! whitespace-separated floating point numbers per line.
//!
//! Bytes arrive in arbitrary chunks (network reads), so a line may span
//! several calls to [`TimeSeriesParser::feed`]. Any malformed line fails
//! the whole retrieval; no line is ever skipped.

use crate::GrdbError;
use serde::{Deserialize, Serialize};

/// One sample of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPoint {
    pub x: f64,
    pub y: f64,
}

/// Line-oriented incremental parser.
#[derive(Debug, Default)]
pub struct TimeSeriesParser {
    pending: Vec<u8>,
    line: usize,
    points: Vec<SpectrumPoint>,
}

impl TimeSeriesParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), GrdbError> {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = self.pending[start..end].to_vec();
            self.parse_line(&line)?;
            start = end + 1;
        }
        self.pending.drain(..start);
        Ok(())
    }

    /// Finish parsing; a final line without a newline is still parsed.
    pub fn finish(mut self) -> Result<Vec<SpectrumPoint>, GrdbError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.parse_line(&rest)?;
        }
        Ok(self.points)
    }

    /// Number of points parsed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Parse a complete in-memory file.
    pub fn parse(bytes: &[u8]) -> Result<Vec<SpectrumPoint>, GrdbError> {
        let mut parser = Self::new();
        parser.feed(bytes)?;
        parser.finish()
    }

    fn parse_line(&mut self, raw: &[u8]) -> Result<(), GrdbError> {
        self.line += 1;
        let line = self.line;
        let malformed = |reason: String| GrdbError::MalformedRemoteData { line, reason };

        let text = std::str::from_utf8(raw).map_err(|_| malformed("not valid UTF-8".to_string()))?;
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [x, y] = fields.as_slice() else {
            return Err(malformed(format!(
                "expected 2 fields, found {}",
                fields.len()
            )));
        };

        let number = |token: &str| {
            token
                .parse::<f64>()
                .map_err(|_| malformed(format!("'{}' is not a number", token)))
        };
        self.points.push(SpectrumPoint {
            x: number(*x)?,
            y: number(*y)?,
        });
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let points = TimeSeriesParser::parse(b"100.5 20\n101.0\t21.5\r\n").expect("parse");
        assert_eq!(
            points,
            vec![
                SpectrumPoint { x: 100.5, y: 20.0 },
                SpectrumPoint { x: 101.0, y: 21.5 }
            ]
        );
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut parser = TimeSeriesParser::new();
        parser.feed(b"1.0 2").expect("feed");
        assert!(parser.is_empty());
        parser.feed(b".5\n3.0 ").expect("feed");
        assert_eq!(parser.len(), 1);
        parser.feed(b"4.0").expect("feed");
        let points = parser.finish().expect("finish");
        assert_eq!(points[1], SpectrumPoint { x: 3.0, y: 4.0 });
    }

    #[test]
    fn wrong_field_count_fails_whole_file() {
        let err = TimeSeriesParser::parse(b"1 2\n3 4 5\n6 7\n").expect_err("malformed");
        assert!(matches!(err, GrdbError::MalformedRemoteData { line: 2, .. }));
    }

    #[test]
    fn non_numeric_token_fails() {
        let err = TimeSeriesParser::parse(b"1 2\nx 4\n").expect_err("malformed");
        assert!(matches!(
            err,
            GrdbError::MalformedRemoteData { line: 2, ref reason } if reason.contains("'x'")
        ));
    }

    #[test]
    fn blank_line_is_malformed() {
        let err = TimeSeriesParser::parse(b"1 2\n\n3 4\n").expect_err("malformed");
        assert!(matches!(err, GrdbError::MalformedRemoteData { line: 2, .. }));
    }

    #[test]
    fn empty_body_is_empty_series() {
        assert!(TimeSeriesParser::parse(b"").expect("parse").is_empty());
    }
}
