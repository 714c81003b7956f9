// 📖 Document driver
// Streams an XML document through quick-xml and pushes start / text / end
// events into an IdentityParser. The document is never held in memory; its
// bytes are hashed on the way through for the run report.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::parser::IdentityParser;
use crate::report::IngestReport;
use crate::sink::Store;

/// Read wrapper that feeds every byte it hands out into a SHA-256
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        HashingReader {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn hex_digest(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// A run cut short by a fatal fault
///
/// The session is finished anyway: `report` holds the counts up to the fault
/// and `store` still has its open transaction, so the caller decides whether
/// the rows since the last checkpoint are committed or rolled back.
#[derive(Debug)]
pub struct Aborted<S> {
    pub error: IngestError,
    pub report: IngestReport,
    pub store: S,
}

impl<S: Store> Aborted<S> {
    pub fn new(error: IngestError, parser: IdentityParser<S>) -> Self {
        let (report, store) = parser.finish();
        Self::from_parts(error, report, store)
    }

    fn from_parts(error: IngestError, mut report: IngestReport, store: S) -> Self {
        report.aborted = Some(error.to_string());
        Aborted {
            error,
            report,
            store,
        }
    }
}

pub type ParseOutcome<S> = std::result::Result<(IngestReport, S), Aborted<S>>;

/// Parse the document at `path` to completion
pub fn parse_file<S: Store>(path: &Path, parser: IdentityParser<S>) -> ParseOutcome<S> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return Err(Aborted::new(e.into(), parser)),
    };
    tracing::info!(document = %path.display(), run_id = parser.run_id(), "parsing");

    let mut hashing = BufReader::new(HashingReader::new(file));
    let (mut report, store) = drive(&mut hashing, parser)?;

    // Drain anything after the root element so the digest covers the whole file
    if let Err(e) = std::io::copy(&mut hashing, &mut std::io::sink()) {
        return Err(Aborted::from_parts(e.into(), report, store));
    }
    report.source_digest = Some(hashing.into_inner().hex_digest());

    Ok((report, store))
}

/// Drive `parser` with the events of an in-memory or buffered document
pub fn parse_reader<B: BufRead, S: Store>(input: B, parser: IdentityParser<S>) -> ParseOutcome<S> {
    let mut input = input;
    drive(&mut input, parser)
}

fn drive<B: BufRead, S: Store>(input: &mut B, mut parser: IdentityParser<S>) -> ParseOutcome<S> {
    match pump(input, &mut parser) {
        Ok(()) => Ok(parser.finish()),
        Err(error) => Err(Aborted::new(error, parser)),
    }
}

fn pump<B: BufRead, S: Store>(input: &mut B, parser: &mut IdentityParser<S>) -> Result<()> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                let attrs = attributes(&e)?;
                parser.on_element_start(&name, attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
            Event::Empty(e) => {
                let name = element_name(&e)?;
                let attrs = attributes(&e)?;
                parser.on_element_start(&name, attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                parser.on_element_end(&name);
            }
            Event::End(e) => {
                let local = e.local_name();
                parser.on_element_end(utf8(local.as_ref())?);
            }
            Event::Text(e) => {
                parser.on_character_data(&e.unescape()?);
            }
            Event::CData(e) => {
                parser.on_character_data(utf8(&e)?);
            }
            Event::Eof => return Ok(()),
            _ => {}
        }
        buf.clear();
    }
}

fn element_name(e: &BytesStart<'_>) -> Result<String> {
    Ok(utf8(e.local_name().as_ref())?.to_string())
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        let key = utf8(attr.key.local_name().as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| IngestError::InvalidDocument(format!("non UTF-8 name or data: {}", e)))
}
