//! The parsed manifest and its wire-format parser.

use chrono::{DateTime, FixedOffset};
use url::Url;

use super::error::ControlError;
use crate::checksum::{weak_sum_mask, Rsum};

/// Highest control-file major version this parser understands.
const SUPPORTED_MAJOR_VERSION: u32 = 0;

/// Per-block checksums from the manifest table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSums {
    /// Weak rolling checksum, already masked to its stored width.
    pub weak: Rsum,
    /// Strong checksum; only the leading `strong_bytes` are meaningful.
    pub strong: [u8; 16],
}

/// A parsed control file.
///
/// Immutable once parsed: all the target file's metadata plus the
/// ordered per-block checksum table. Invariants established by
/// [`Manifest::parse`]:
///
/// - `block_size` is a power of two, `length > 0`
/// - `block_count == length.div_ceil(block_size)`
/// - `block_sums.len() == block_count`
/// - `url` is absolute, `sha1` is 40 lowercase hex characters
#[derive(Clone, Debug)]
pub struct Manifest {
    version: String,
    filename: String,
    mtime: DateTime<FixedOffset>,
    block_size: u32,
    length: u64,
    seq_matches: u8,
    weak_bytes: u8,
    strong_bytes: u8,
    url: Url,
    sha1: String,
    block_sums: Vec<BlockSums>,
}

impl Manifest {
    /// Parse a complete control file.
    ///
    /// `base_url` is the URL the control file itself was fetched from;
    /// a relative `URL` header is resolved against it. Header lines are
    /// validated in order and the binary table must match the computed
    /// block count exactly; on any failure no manifest is returned.
    pub fn parse(bytes: &[u8], base_url: Option<&Url>) -> Result<Self, ControlError> {
        let marker = find_table_marker(bytes).ok_or(ControlError::MissingTableMarker)?;
        let header = std::str::from_utf8(&bytes[..marker])
            .map_err(|_| ControlError::MissingTableMarker)?;
        let table = &bytes[marker + 2..];

        let mut lines = header.split('\n');

        let version = parse_version_line(lines.next().ok_or(ControlError::MissingField("zsync"))?)?;

        let filename = expect_field(lines.next(), "Filename")?.to_string();
        if filename.is_empty() {
            return Err(ControlError::InvalidFilename);
        }

        let mtime_str = expect_field(lines.next(), "MTime")?;
        let mtime = DateTime::parse_from_rfc2822(mtime_str)
            .map_err(|_| ControlError::InvalidMtime(mtime_str.to_string()))?;

        let blocksize_str = expect_field(lines.next(), "Blocksize")?;
        let block_size: u32 = blocksize_str
            .parse()
            .map_err(|_| ControlError::InvalidBlockSize(blocksize_str.to_string()))?;
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(ControlError::InvalidBlockSize(blocksize_str.to_string()));
        }

        let length_str = expect_field(lines.next(), "Length")?;
        let length: u64 = length_str
            .parse()
            .map_err(|_| ControlError::InvalidLength(length_str.to_string()))?;
        if length == 0 {
            return Err(ControlError::InvalidLength(length_str.to_string()));
        }

        let hash_lengths = expect_field(lines.next(), "Hash-Lengths")?;
        let (seq_matches, weak_bytes, strong_bytes) = parse_hash_lengths(hash_lengths)?;

        let url_str = expect_field(lines.next(), "URL")?;
        let url = resolve_url(url_str, base_url)?;

        let sha1_str = expect_field(lines.next(), "SHA-1")?;
        if sha1_str.len() != 40 || !sha1_str.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ControlError::InvalidSha1(sha1_str.to_string()));
        }
        let sha1 = sha1_str.to_ascii_lowercase();

        let block_count = length.div_ceil(u64::from(block_size)) as usize;
        let entry_size = usize::from(weak_bytes) + usize::from(strong_bytes);
        let expected = block_count * entry_size;
        if table.len() != expected {
            return Err(ControlError::TableLengthMismatch {
                expected,
                actual: table.len(),
            });
        }

        let mask = weak_sum_mask(weak_bytes);
        let mut block_sums = Vec::with_capacity(block_count);
        for entry in table.chunks_exact(entry_size) {
            let weak = Rsum::from_wire(&entry[..usize::from(weak_bytes)], mask);
            let mut strong = [0u8; 16];
            strong[..usize::from(strong_bytes)].copy_from_slice(&entry[usize::from(weak_bytes)..]);
            block_sums.push(BlockSums { weak, strong });
        }

        Ok(Self {
            version,
            filename,
            mtime,
            block_size,
            length,
            seq_matches,
            weak_bytes,
            strong_bytes,
            url,
            sha1,
            block_sums,
        })
    }

    /// Version string of the tool that produced the control file.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Target file name, as published.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Target file modification time.
    pub fn mtime(&self) -> DateTime<FixedOffset> {
        self.mtime
    }

    /// Block size in bytes (a power of two).
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// log2 of the block size.
    pub fn block_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    /// Target file length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Number of blocks in the target file.
    pub fn block_count(&self) -> u32 {
        self.block_sums.len() as u32
    }

    /// Consecutive block matches required to accept a candidate.
    pub fn seq_matches(&self) -> u8 {
        self.seq_matches
    }

    /// Stored weak-checksum width in bytes.
    pub fn weak_bytes(&self) -> u8 {
        self.weak_bytes
    }

    /// Stored strong-checksum width in bytes.
    pub fn strong_bytes(&self) -> u8 {
        self.strong_bytes
    }

    /// Absolute URL of the target file.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whole-file SHA-1 of the target, lowercase hex.
    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    /// Per-block checksums, indexed by block id.
    pub fn block_sums(&self) -> &[BlockSums] {
        &self.block_sums
    }

    /// Byte length of the given block (the final block may be short).
    pub fn block_len(&self, block_id: u32) -> u64 {
        let from = u64::from(block_id) << self.block_shift();
        (self.length - from).min(u64::from(self.block_size))
    }
}

/// Locate the `\n\n` separator between header and checksum table.
///
/// Returns the offset of the first `\n`; the table starts two bytes
/// later.
fn find_table_marker(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\n\n")
}

fn parse_version_line(line: &str) -> Result<String, ControlError> {
    let version = line
        .strip_prefix("zsync: ")
        .ok_or_else(|| ControlError::InvalidVersionLine(line.to_string()))?;
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ControlError::InvalidVersionLine(line.to_string()))?;
    if major > SUPPORTED_MAJOR_VERSION {
        return Err(ControlError::UnsupportedVersion(version.to_string()));
    }
    Ok(version.to_string())
}

fn expect_field<'a>(
    line: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, ControlError> {
    let line = line.ok_or(ControlError::MissingField(name))?;
    let mut parts = line.splitn(2, ": ");
    let key = parts.next().unwrap_or_default();
    if key != name {
        return Err(ControlError::MissingField(name));
    }
    parts.next().ok_or(ControlError::MissingField(name))
}

fn parse_hash_lengths(value: &str) -> Result<(u8, u8, u8), ControlError> {
    let invalid = || ControlError::InvalidHashLengths(value.to_string());
    let mut parts = value.split(',');
    let seq: u8 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let weak: u8 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let strong: u8 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    if !(1..=2).contains(&seq) || !(1..=4).contains(&weak) || !(1..=16).contains(&strong) {
        return Err(invalid());
    }
    Ok((seq, weak, strong))
}

/// Resolve the `URL` header, joining relative URLs against the control
/// file's own URL.
fn resolve_url(value: &str, base_url: Option<&Url>) -> Result<Url, ControlError> {
    match Url::parse(value) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base_url
            .and_then(|base| base.join(value).ok())
            .ok_or_else(|| ControlError::InvalidUrl(value.to_string())),
        Err(_) => Err(ControlError::InvalidUrl(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md4_block;

    /// Assemble a control file for a synthetic target buffer.
    fn build_control(target: &[u8], block_size: u32, url_line: &str) -> Vec<u8> {
        let length = target.len() as u64;
        let header = format!(
            "zsync: 0.6.2\nFilename: app.bin\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
             Blocksize: {}\nLength: {}\nHash-Lengths: 1,4,16\nURL: {}\nSHA-1: {}\n\n",
            block_size,
            length,
            url_line,
            "0123456789abcdef0123456789abcdef01234567",
        );

        let mut bytes = header.into_bytes();
        for block in target.chunks(block_size as usize) {
            let mut padded = vec![0u8; block_size as usize];
            padded[..block.len()].copy_from_slice(block);
            let weak = Rsum::compute(&padded);
            bytes.extend_from_slice(&weak.a.to_be_bytes());
            bytes.extend_from_slice(&weak.b.to_be_bytes());
            bytes.extend_from_slice(&md4_block(&padded));
        }
        bytes
    }

    #[test]
    fn test_parse_roundtrip() {
        let target: Vec<u8> = (0u32..5000).map(|i| (i % 251) as u8).collect();
        let control = build_control(&target, 1024, "http://example.com/app.bin");

        let manifest = Manifest::parse(&control, None).unwrap();

        assert_eq!(manifest.filename(), "app.bin");
        assert_eq!(manifest.block_size(), 1024);
        assert_eq!(manifest.block_shift(), 10);
        assert_eq!(manifest.length(), 5000);
        assert_eq!(manifest.block_count(), 5);
        assert_eq!(manifest.seq_matches(), 1);
        assert_eq!(manifest.weak_bytes(), 4);
        assert_eq!(manifest.strong_bytes(), 16);
        assert_eq!(manifest.url().as_str(), "http://example.com/app.bin");
        assert_eq!(manifest.sha1(), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(manifest.block_sums().len(), 5);
    }

    #[test]
    fn test_parse_block_sums_match_recomputation() {
        let target: Vec<u8> = (0u32..4096).map(|i| (i * 13 % 256) as u8).collect();
        let control = build_control(&target, 2048, "http://example.com/app.bin");

        let manifest = Manifest::parse(&control, None).unwrap();

        for (id, sums) in manifest.block_sums().iter().enumerate() {
            let block = &target[id * 2048..(id + 1) * 2048];
            assert_eq!(sums.weak, Rsum::compute(block));
            assert_eq!(sums.strong, md4_block(block));
        }
    }

    #[test]
    fn test_parse_resolves_relative_url() {
        let target = vec![7u8; 1024];
        let control = build_control(&target, 1024, "app.bin");
        let base = Url::parse("http://example.com/releases/app.bin.zsync").unwrap();

        let manifest = Manifest::parse(&control, Some(&base)).unwrap();
        assert_eq!(manifest.url().as_str(), "http://example.com/releases/app.bin");
    }

    #[test]
    fn test_parse_relative_url_without_base_fails() {
        let target = vec![7u8; 1024];
        let control = build_control(&target, 1024, "app.bin");

        let err = Manifest::parse(&control, None).unwrap_err();
        assert!(matches!(err, ControlError::InvalidUrl(_)));
    }

    #[test]
    fn test_parse_missing_marker() {
        let err = Manifest::parse(b"zsync: 0.6.2\nFilename: x\n", None).unwrap_err();
        assert_eq!(err, ControlError::MissingTableMarker);
    }

    #[test]
    fn test_parse_unsupported_version() {
        // Version gate fires before anything else is examined.
        let header = "zsync: 1.0.0\nFilename: a\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
                      Blocksize: 1024\nLength: 10\nHash-Lengths: 1,4,16\n\
                      URL: http://e.com/a\nSHA-1: 0123456789abcdef0123456789abcdef01234567\n\n";
        let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
        assert!(matches!(err, ControlError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_parse_rejects_non_power_of_two_blocksize() {
        let header = "zsync: 0.6.2\nFilename: a\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
                      Blocksize: 1000\nLength: 10\nHash-Lengths: 1,4,16\n\
                      URL: http://e.com/a\nSHA-1: 0123456789abcdef0123456789abcdef01234567\n\n";
        let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
        assert!(matches!(err, ControlError::InvalidBlockSize(_)));
    }

    #[test]
    fn test_parse_rejects_zero_length() {
        let header = "zsync: 0.6.2\nFilename: a\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
                      Blocksize: 1024\nLength: 0\nHash-Lengths: 1,4,16\n\
                      URL: http://e.com/a\nSHA-1: 0123456789abcdef0123456789abcdef01234567\n\n";
        let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
        assert!(matches!(err, ControlError::InvalidLength(_)));
    }

    #[test]
    fn test_parse_rejects_bad_hash_lengths() {
        for bad in ["3,4,16", "1,5,16", "1,4,17", "1,4", "x,y,z"] {
            let header = format!(
                "zsync: 0.6.2\nFilename: a\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
                 Blocksize: 1024\nLength: 10\nHash-Lengths: {}\n\
                 URL: http://e.com/a\nSHA-1: 0123456789abcdef0123456789abcdef01234567\n\n",
                bad
            );
            let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
            assert!(
                matches!(err, ControlError::InvalidHashLengths(_)),
                "expected InvalidHashLengths for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_parse_rejects_short_sha1() {
        let header = "zsync: 0.6.2\nFilename: a\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
                      Blocksize: 1024\nLength: 10\nHash-Lengths: 1,4,16\n\
                      URL: http://e.com/a\nSHA-1: abc123\n\n";
        let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
        assert!(matches!(err, ControlError::InvalidSha1(_)));
    }

    #[test]
    fn test_parse_rejects_table_length_mismatch() {
        let target = vec![1u8; 2048];
        let mut control = build_control(&target, 1024, "http://e.com/a");
        control.truncate(control.len() - 1);

        let err = Manifest::parse(&control, None).unwrap_err();
        assert!(matches!(err, ControlError::TableLengthMismatch { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let header = "zsync: 0.6.2\nFilename: a\nBlocksize: 1024\n\n";
        let err = Manifest::parse(header.as_bytes(), None).unwrap_err();
        assert_eq!(err, ControlError::MissingField("MTime"));
    }

    #[test]
    fn test_parse_uppercase_sha1_is_normalized() {
        let target = vec![9u8; 256];
        // The builder always emits lowercase; patch in uppercase by hand.
        let mut patched = build_control(&target, 256, "http://e.com/a");
        let needle = b"0123456789abcdef0123456789abcdef01234567";
        let pos = patched
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        patched[pos..pos + needle.len()]
            .copy_from_slice(b"0123456789ABCDEF0123456789ABCDEF01234567");

        let manifest = Manifest::parse(&patched, None).unwrap();
        assert_eq!(manifest.sha1(), "0123456789abcdef0123456789abcdef01234567");
    }

    #[test]
    fn test_block_len_final_partial_block() {
        let target = vec![3u8; 1500];
        let control = build_control(&target, 1024, "http://e.com/a");
        let manifest = Manifest::parse(&control, None).unwrap();

        assert_eq!(manifest.block_count(), 2);
        assert_eq!(manifest.block_len(0), 1024);
        assert_eq!(manifest.block_len(1), 476);
    }
}
