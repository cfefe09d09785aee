//! Built-in plugin catalog.
//!
//! Each plugin is declared as a [`PluginDescriptor`] literal: its name,
//! aliases, parameters and constructor. The resolver validates against these
//! declarations before a constructor ever runs.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use sha2::{Digest, Sha256, Sha512};

use super::types::{
    Analyzer, ConstructResult, Constructor, Fixup, Logger, MutationStrategy, ParamDescriptor,
    ParamKind, ParamMap, PluginDescriptor, PluginKind, Publisher, Transformer,
};
use crate::dom::Variant;

/// Mutator names known to the engine, for `<Mutators>` validation.
pub const KNOWN_MUTATORS: &[&str] = &[
    "ArrayNumericEdgeCasesMutator",
    "ArrayRandomEdgeCasesMutator",
    "ArrayReverseOrderMutator",
    "BlobBitFlipperMutator",
    "BlobChangeFromNull",
    "BlobChangeRandom",
    "BlobChangeSpecial",
    "BlobExpandAllRandom",
    "BlobReduce",
    "DataElementDuplicateMutator",
    "DataElementRemoveMutator",
    "DataElementSwapNearNodesMutator",
    "DoubleEdgeCase",
    "NumberEdgeCase",
    "NumberRandom",
    "NumberVariance",
    "StringCaseMutator",
    "StringLengthEdgeCase",
    "StringUtf8BomLength",
    "UnicodeBomMutator",
    "UnicodeStringsMutator",
    "ValidValuesMutator",
];

/// Name of the strategy used when a test declares none.
pub const DEFAULT_STRATEGY: &str = "Random";

const REF_PARAM: ParamDescriptor =
    ParamDescriptor::required("ref", ParamKind::ElementRef, "Reference to data element");

/// Descriptors for every built-in plugin.
#[must_use]
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        // Fixups
        PluginDescriptor::new(PluginKind::Fixup, "Crc32Fixup", Constructor::Fixup(crc32_fixup))
            .alias("checksums.Crc32Fixup")
            .param(REF_PARAM),
        PluginDescriptor::new(
            PluginKind::Fixup,
            "IcmpChecksumFixup",
            Constructor::Fixup(icmp_checksum_fixup),
        )
        .alias("checksums.IcmpChecksumFixup")
        .param(REF_PARAM),
        PluginDescriptor::new(
            PluginKind::Fixup,
            "Fletcher16Fixup",
            Constructor::Fixup(fletcher16_fixup),
        )
        .alias("checksums.Fletcher16Fixup")
        .param(REF_PARAM),
        PluginDescriptor::new(PluginKind::Fixup, "Md5Fixup", Constructor::Fixup(md5_fixup))
            .alias("checksums.Md5Fixup")
            .param(REF_PARAM),
        PluginDescriptor::new(PluginKind::Fixup, "Sha256Fixup", Constructor::Fixup(sha256_fixup))
            .alias("checksums.Sha256Fixup")
            .param(REF_PARAM),
        PluginDescriptor::new(PluginKind::Fixup, "Sha512Fixup", Constructor::Fixup(sha512_fixup))
            .alias("checksums.Sha512Fixup")
            .param(REF_PARAM),
        // Transformers
        PluginDescriptor::new(PluginKind::Transformer, "Hex", Constructor::Transformer(hex_transformer))
            .alias("encode.Hex")
            .param(ParamDescriptor::optional(
                "Lowercase",
                ParamKind::Bool,
                Some("true"),
                "Emit lowercase hex digits",
            )),
        PluginDescriptor::new(
            PluginKind::Transformer,
            "Base64Encode",
            Constructor::Transformer(base64_encode),
        )
        .alias("encode.Base64Encode"),
        PluginDescriptor::new(
            PluginKind::Transformer,
            "Base64Decode",
            Constructor::Transformer(base64_decode),
        )
        .alias("encode.Base64Decode"),
        PluginDescriptor::new(PluginKind::Transformer, "Truncate", Constructor::Transformer(truncate))
            .param(ParamDescriptor::required(
                "Length",
                ParamKind::UInt,
                "Number of bytes to keep",
            ))
            .param(ParamDescriptor::optional(
                "Offset",
                ParamKind::UInt,
                Some("0"),
                "Number of leading bytes to drop",
            )),
        // Analyzers
        PluginDescriptor::new(
            PluginKind::Analyzer,
            "StringToken",
            Constructor::Analyzer(string_token_analyzer),
        )
        .param(ParamDescriptor::optional(
            "Tokens",
            ParamKind::String,
            Some("\r\n\"'[]{}<>` \t.,~!@#$%^?&*_=+-|\\:;/"),
            "List of character tokens",
        )),
        PluginDescriptor::new(PluginKind::Analyzer, "Regex", Constructor::Analyzer(regex_analyzer))
            .param(ParamDescriptor::required(
                "Regex",
                ParamKind::String,
                "The regex to use with named groups",
            )),
        // Publishers
        PluginDescriptor::new(PluginKind::Publisher, "Tcp", Constructor::Publisher(tcp_publisher))
            .alias("TcpClient")
            .param(ParamDescriptor::required(
                "Host",
                ParamKind::String,
                "Hostname or IP address of remote host",
            ))
            .param(ParamDescriptor::required(
                "Port",
                ParamKind::UInt,
                "Destination port number",
            ))
            .param(ParamDescriptor::optional(
                "Timeout",
                ParamKind::UInt,
                Some("3000"),
                "How many milliseconds to wait for data",
            ))
            .param(ParamDescriptor::optional(
                "ConnectTimeout",
                ParamKind::UInt,
                Some("10000"),
                "Max milliseconds to wait for connection",
            )),
        PluginDescriptor::new(PluginKind::Publisher, "Udp", Constructor::Publisher(udp_publisher))
            .param(ParamDescriptor::required(
                "Host",
                ParamKind::String,
                "Hostname or IP address of remote host",
            ))
            .param(ParamDescriptor::required(
                "Port",
                ParamKind::UInt,
                "Destination port number",
            ))
            .param(ParamDescriptor::optional(
                "SrcPort",
                ParamKind::UInt,
                None,
                "Source port number",
            ))
            .param(ParamDescriptor::optional(
                "Timeout",
                ParamKind::UInt,
                Some("3000"),
                "How many milliseconds to wait for data",
            )),
        PluginDescriptor::new(PluginKind::Publisher, "File", Constructor::Publisher(file_publisher))
            .alias("FileStream")
            .param(ParamDescriptor::required(
                "FileName",
                ParamKind::String,
                "Name of file to open for reading/writing",
            ))
            .param(ParamDescriptor::optional(
                "Overwrite",
                ParamKind::Bool,
                Some("true"),
                "Replace existing file contents",
            ))
            .param(ParamDescriptor::optional(
                "Append",
                ParamKind::Bool,
                Some("false"),
                "Append to the end of the file",
            ))
            .obsolete("Filename", Some("FileName")),
        PluginDescriptor::new(PluginKind::Publisher, "Null", Constructor::Publisher(null_publisher)),
        PluginDescriptor::new(
            PluginKind::Publisher,
            "Console",
            Constructor::Publisher(console_publisher),
        )
        .alias("Stdout"),
        PluginDescriptor::new(
            PluginKind::Publisher,
            "ConsoleHex",
            Constructor::Publisher(console_hex_publisher),
        )
        .param(ParamDescriptor::optional(
            "BytesPerLine",
            ParamKind::UInt,
            Some("16"),
            "How many bytes per row of text",
        )),
        PluginDescriptor::new(
            PluginKind::Publisher,
            "RawEther",
            Constructor::Publisher(raw_ether_publisher),
        )
        .param(ParamDescriptor::required(
            "Interface",
            ParamKind::String,
            "Name of interface to bind to",
        ))
        .param(ParamDescriptor::optional(
            "Timeout",
            ParamKind::UInt,
            Some("3000"),
            "How many milliseconds to wait for data",
        ))
        .obsolete("Protocol", None),
        // Loggers
        PluginDescriptor::new(PluginKind::Logger, "File", Constructor::Logger(file_logger))
            .alias("Filesystem")
            .param(ParamDescriptor::optional(
                "Path",
                ParamKind::String,
                Some("logs"),
                "Log folder",
            )),
        PluginDescriptor::new(PluginKind::Logger, "Metrics", Constructor::Logger(metrics_logger))
            .param(ParamDescriptor::optional(
                "Path",
                ParamKind::String,
                Some("metrics"),
                "Metrics folder",
            )),
        // Strategies
        PluginDescriptor::new(PluginKind::Strategy, "Random", Constructor::Strategy(random_strategy))
            .param(ParamDescriptor::optional(
                "SwitchCount",
                ParamKind::UInt,
                Some("200"),
                "Number of iterations to perform per switch",
            ))
            .param(ParamDescriptor::optional(
                "MaxFieldsToMutate",
                ParamKind::UInt,
                Some("6"),
                "Maximum fields to mutate at once",
            ))
            .param(ParamDescriptor::optional(
                "StateMutation",
                ParamKind::Bool,
                Some("false"),
                "Enable state mutations",
            ))
            .param(ParamDescriptor::optional(
                "Weighting",
                ParamKind::UInt,
                Some("10"),
                "Weighting of mutable elements",
            )),
        PluginDescriptor::new(
            PluginKind::Strategy,
            "Sequential",
            Constructor::Strategy(sequential_strategy),
        ),
        PluginDescriptor::new(
            PluginKind::Strategy,
            "RandomDeterministic",
            Constructor::Strategy(random_deterministic_strategy),
        ),
    ]
}

// ── Fixups ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Crc32Fixup;

impl Fixup for Crc32Fixup {
    fn compute(&self, data: &[u8]) -> Variant {
        Variant::UInt(u64::from(crc32(data)))
    }
}

/// CRC-32 (IEEE 802.3, reflected, polynomial 0xEDB88320).
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

fn crc32_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(Crc32Fixup))
}

#[derive(Debug)]
struct IcmpChecksumFixup;

impl Fixup for IcmpChecksumFixup {
    fn compute(&self, data: &[u8]) -> Variant {
        let mut sum: u32 = data
            .chunks(2)
            .map(|pair| {
                let hi = u32::from(pair[0]) << 8;
                let lo = pair.get(1).map_or(0, |b| u32::from(*b));
                hi | lo
            })
            .sum();
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        Variant::UInt(u64::from(!(sum as u16)))
    }
}

fn icmp_checksum_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(IcmpChecksumFixup))
}

#[derive(Debug)]
struct Fletcher16Fixup;

impl Fixup for Fletcher16Fixup {
    fn compute(&self, data: &[u8]) -> Variant {
        let (low, high) = data.iter().fold((0u16, 0u16), |(a, b), &byte| {
            let a = (a + u16::from(byte)) % 255;
            (a, (b + a) % 255)
        });
        Variant::UInt(u64::from((high << 8) | low))
    }
}

fn fletcher16_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(Fletcher16Fixup))
}

#[derive(Debug)]
struct Md5Fixup;

impl Fixup for Md5Fixup {
    fn compute(&self, data: &[u8]) -> Variant {
        Variant::Bytes(md5::compute(data).0.to_vec())
    }
}

fn md5_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(Md5Fixup))
}

#[derive(Debug)]
struct Sha256Fixup;

impl Fixup for Sha256Fixup {
    fn compute(&self, data: &[u8]) -> Variant {
        Variant::Bytes(Sha256::digest(data).to_vec())
    }
}

fn sha256_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(Sha256Fixup))
}

#[derive(Debug)]
struct Sha512Fixup;

impl Fixup for Sha512Fixup {
    fn compute(&self, data: &[u8]) -> Variant {
        Variant::Bytes(Sha512::digest(data).to_vec())
    }
}

fn sha512_fixup(_params: &ParamMap) -> ConstructResult<dyn Fixup> {
    Ok(Arc::new(Sha512Fixup))
}

// ── Transformers ────────────────────────────────────────────────

#[derive(Debug)]
struct HexTransformer {
    lowercase: bool,
}

impl Transformer for HexTransformer {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let text = if self.lowercase {
            hex::encode(data)
        } else {
            hex::encode_upper(data)
        };
        Ok(text.into_bytes())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        hex::decode(data).map_err(|e| e.to_string())
    }
}

fn hex_transformer(params: &ParamMap) -> ConstructResult<dyn Transformer> {
    Ok(Arc::new(HexTransformer {
        lowercase: params.parse_bool("Lowercase", true)?,
    }))
}

#[derive(Debug)]
struct Base64EncodeTransformer;

impl Transformer for Base64EncodeTransformer {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        Ok(STANDARD.encode(data).into_bytes())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        STANDARD.decode(data).map_err(|e| e.to_string())
    }
}

fn base64_encode(_params: &ParamMap) -> ConstructResult<dyn Transformer> {
    Ok(Arc::new(Base64EncodeTransformer))
}

#[derive(Debug)]
struct Base64DecodeTransformer;

impl Transformer for Base64DecodeTransformer {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        STANDARD.decode(data).map_err(|e| e.to_string())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        Ok(STANDARD.encode(data).into_bytes())
    }
}

fn base64_decode(_params: &ParamMap) -> ConstructResult<dyn Transformer> {
    Ok(Arc::new(Base64DecodeTransformer))
}

#[derive(Debug)]
struct TruncateTransformer {
    offset: usize,
    length: usize,
}

impl Transformer for TruncateTransformer {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        Ok(data
            .iter()
            .skip(self.offset)
            .take(self.length)
            .copied()
            .collect())
    }

    fn decode(&self, _data: &[u8]) -> Result<Vec<u8>, String> {
        Err("truncated data cannot be restored".to_string())
    }
}

fn truncate(params: &ParamMap) -> ConstructResult<dyn Transformer> {
    let to_usize = |v: u64| usize::try_from(v).map_err(|e| e.to_string());
    Ok(Arc::new(TruncateTransformer {
        offset: to_usize(params.parse_u64("Offset", 0)?)?,
        length: to_usize(params.parse_u64("Length", 0)?)?,
    }))
}

// ── Analyzers ───────────────────────────────────────────────────

#[derive(Debug)]
struct StringTokenAnalyzer {
    tokens: Vec<char>,
}

impl Analyzer for StringTokenAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split(|c| self.tokens.contains(&c))
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn string_token_analyzer(params: &ParamMap) -> ConstructResult<dyn Analyzer> {
    let tokens: Vec<char> = params.get("Tokens").unwrap_or_default().chars().collect();
    if tokens.is_empty() {
        return Err("at least one token character is required".to_string());
    }
    Ok(Arc::new(StringTokenAnalyzer { tokens }))
}

#[derive(Debug)]
struct RegexAnalyzer {
    regex: Regex,
}

impl Analyzer for RegexAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        self.regex
            .captures(text)
            .map(|caps| {
                caps.iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn regex_analyzer(params: &ParamMap) -> ConstructResult<dyn Analyzer> {
    let pattern = params.required("Regex")?;
    let regex = Regex::new(pattern).map_err(|e| format!("Exception during object creation: {e}"))?;
    Ok(Arc::new(RegexAnalyzer { regex }))
}

// ── Publishers ──────────────────────────────────────────────────

#[derive(Debug)]
struct SocketPublisher {
    scheme: &'static str,
    host: String,
    port: u16,
    timeout_ms: u64,
}

impl Publisher for SocketPublisher {
    fn describe(&self) -> String {
        format!(
            "{}://{}:{} (timeout {}ms)",
            self.scheme, self.host, self.port, self.timeout_ms
        )
    }
}

fn socket_publisher(scheme: &'static str, params: &ParamMap) -> ConstructResult<dyn Publisher> {
    let port = params.parse_u64("Port", 0)?;
    let port = u16::try_from(port).map_err(|_| format!("port {port} is out of range"))?;
    Ok(Arc::new(SocketPublisher {
        scheme,
        host: params.required("Host")?.to_string(),
        port,
        timeout_ms: params.parse_u64("Timeout", 3000)?,
    }))
}

fn tcp_publisher(params: &ParamMap) -> ConstructResult<dyn Publisher> {
    params.parse_u64("ConnectTimeout", 10_000)?;
    socket_publisher("tcp", params)
}

fn udp_publisher(params: &ParamMap) -> ConstructResult<dyn Publisher> {
    if let Some(src) = params.get("SrcPort") {
        src.parse::<u16>()
            .map_err(|_| format!("source port '{src}' is out of range"))?;
    }
    socket_publisher("udp", params)
}

#[derive(Debug)]
struct FilePublisher {
    file_name: String,
    append: bool,
}

impl Publisher for FilePublisher {
    fn describe(&self) -> String {
        let mode = if self.append { "append" } else { "overwrite" };
        format!("file://{} ({mode})", self.file_name)
    }
}

fn file_publisher(params: &ParamMap) -> ConstructResult<dyn Publisher> {
    let overwrite = params.parse_bool("Overwrite", true)?;
    let append = params.parse_bool("Append", false)?;
    if overwrite && append {
        return Err("Overwrite and Append are mutually exclusive".to_string());
    }
    Ok(Arc::new(FilePublisher {
        file_name: params.required("FileName")?.to_string(),
        append,
    }))
}

#[derive(Debug)]
struct NamedPublisher(&'static str);

impl Publisher for NamedPublisher {
    fn describe(&self) -> String {
        self.0.to_string()
    }
}

/// Publisher that discards all output.
pub fn null_publisher(_params: &ParamMap) -> ConstructResult<dyn Publisher> {
    Ok(Arc::new(NamedPublisher("null")))
}

fn console_publisher(_params: &ParamMap) -> ConstructResult<dyn Publisher> {
    Ok(Arc::new(NamedPublisher("console")))
}

#[derive(Debug)]
struct ConsoleHexPublisher {
    bytes_per_line: u64,
}

impl Publisher for ConsoleHexPublisher {
    fn describe(&self) -> String {
        format!("console (hex, {} bytes per line)", self.bytes_per_line)
    }
}

fn console_hex_publisher(params: &ParamMap) -> ConstructResult<dyn Publisher> {
    let bytes_per_line = params.parse_u64("BytesPerLine", 16)?;
    if bytes_per_line == 0 {
        return Err("BytesPerLine must be greater than zero".to_string());
    }
    Ok(Arc::new(ConsoleHexPublisher { bytes_per_line }))
}

#[derive(Debug)]
struct RawEtherPublisher {
    interface: String,
}

impl Publisher for RawEtherPublisher {
    fn describe(&self) -> String {
        format!("ether://{}", self.interface)
    }
}

fn raw_ether_publisher(params: &ParamMap) -> ConstructResult<dyn Publisher> {
    params.parse_u64("Timeout", 3000)?;
    Ok(Arc::new(RawEtherPublisher {
        interface: params.required("Interface")?.to_string(),
    }))
}

// ── Loggers ─────────────────────────────────────────────────────

#[derive(Debug)]
struct FolderLogger {
    kind: &'static str,
    path: String,
}

impl Logger for FolderLogger {
    fn describe(&self) -> String {
        format!("{} logger at {}", self.kind, self.path)
    }
}

fn file_logger(params: &ParamMap) -> ConstructResult<dyn Logger> {
    Ok(Arc::new(FolderLogger {
        kind: "file",
        path: params.required("Path")?.to_string(),
    }))
}

fn metrics_logger(params: &ParamMap) -> ConstructResult<dyn Logger> {
    Ok(Arc::new(FolderLogger {
        kind: "metrics",
        path: params.required("Path")?.to_string(),
    }))
}

// ── Strategies ──────────────────────────────────────────────────

#[derive(Debug)]
struct RandomStrategy {
    switch_count: u64,
    max_fields: u64,
    state_mutation: bool,
    weighting: u64,
}

impl MutationStrategy for RandomStrategy {
    fn describe(&self) -> String {
        format!(
            "random (switchCount={}, maxFieldsToMutate={}, stateMutation={}, weighting={})",
            self.switch_count, self.max_fields, self.state_mutation, self.weighting
        )
    }
}

fn random_strategy(params: &ParamMap) -> ConstructResult<dyn MutationStrategy> {
    let max_fields = params.parse_u64("MaxFieldsToMutate", 6)?;
    if max_fields == 0 {
        return Err("MaxFieldsToMutate must be at least 1".to_string());
    }
    Ok(Arc::new(RandomStrategy {
        switch_count: params.parse_u64("SwitchCount", 200)?,
        max_fields,
        state_mutation: params.parse_bool("StateMutation", false)?,
        weighting: params.parse_u64("Weighting", 10)?,
    }))
}

#[derive(Debug)]
struct NamedStrategy(&'static str);

impl MutationStrategy for NamedStrategy {
    fn describe(&self) -> String {
        self.0.to_string()
    }
}

fn sequential_strategy(_params: &ParamMap) -> ConstructResult<dyn MutationStrategy> {
    Ok(Arc::new(NamedStrategy("sequential")))
}

fn random_deterministic_strategy(_params: &ParamMap) -> ConstructResult<dyn MutationStrategy> {
    Ok(Arc::new(NamedStrategy("random deterministic")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        let mut map = ParamMap::new();
        for (k, v) in pairs {
            map.insert(*k, *v);
        }
        map
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_fletcher16() {
        let value = Fletcher16Fixup.compute(&[0x01, 0x02]);
        assert_eq!(value, Variant::UInt(0x0403));
    }

    #[test]
    fn test_icmp_checksum() {
        let value = IcmpChecksumFixup.compute(&[0x00, 0x01, 0xF2, 0x03]);
        assert_eq!(value, Variant::UInt(0x0DFB));
    }

    #[test]
    fn test_digest_fixups() {
        let Variant::Bytes(sha) = Sha256Fixup.compute(b"abc") else {
            panic!("expected bytes");
        };
        assert_eq!(
            hex::encode(sha),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let Variant::Bytes(md5) = Md5Fixup.compute(b"") else {
            panic!("expected bytes");
        };
        assert_eq!(hex::encode(md5), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_hex_transformer_case() {
        let lower = hex_transformer(&params(&[("Lowercase", "true")])).unwrap();
        let upper = hex_transformer(&params(&[("Lowercase", "false")])).unwrap();
        assert_eq!(lower.encode(&[0xAB]).unwrap(), b"ab".to_vec());
        assert_eq!(upper.encode(&[0xAB]).unwrap(), b"AB".to_vec());
        assert_eq!(upper.decode(b"AB").unwrap(), vec![0xAB]);
    }

    #[test]
    fn test_base64_pair() {
        let encode = base64_encode(&ParamMap::new()).unwrap();
        let decode = base64_decode(&ParamMap::new()).unwrap();
        assert_eq!(encode.encode(b"hi").unwrap(), b"aGk=".to_vec());
        assert_eq!(decode.encode(b"aGk=").unwrap(), b"hi".to_vec());
    }

    #[test]
    fn test_truncate() {
        let t = truncate(&params(&[("Offset", "1"), ("Length", "2")])).unwrap();
        assert_eq!(t.encode(b"abcd").unwrap(), b"bc".to_vec());
        assert!(t.decode(b"bc").is_err());
    }

    #[test]
    fn test_string_token_analyzer() {
        let analyzer = string_token_analyzer(&params(&[("Tokens", " =")])).unwrap();
        assert_eq!(analyzer.analyze("a=b c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_regex_analyzer_groups() {
        let analyzer = regex_analyzer(&params(&[("Regex", r"(\w+)=(\d+)")])).unwrap();
        assert_eq!(analyzer.analyze("port=80"), vec!["port", "80"]);
    }

    #[test]
    fn test_socket_publisher_rejects_bad_port() {
        let err = tcp_publisher(&params(&[("Host", "h"), ("Port", "70000")])).unwrap_err();
        assert!(err.contains("out of range"));
        let ok = tcp_publisher(&params(&[("Host", "h"), ("Port", "80")])).unwrap();
        assert_eq!(ok.describe(), "tcp://h:80 (timeout 3000ms)");
    }

    #[test]
    fn test_file_publisher_modes() {
        let err = file_publisher(&params(&[
            ("FileName", "out.bin"),
            ("Append", "true"),
        ]))
        .unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn test_descriptor_names_unique_per_kind() {
        let descriptors = builtin_descriptors();
        for (i, a) in descriptors.iter().enumerate() {
            for b in &descriptors[i + 1..] {
                if a.kind == b.kind {
                    assert!(!b.matches(a.name), "{} registered twice", a.name);
                }
            }
        }
    }
}
