//! `repomd.xml` modeling: the top-level RPM repository index that points
//! at typed data files (`primary`, `filelists`, `other`, `updateinfo`, …).

use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use sha2::{Digest, Sha256};

use crate::RpmPluginError;

pub const XML_NS_REPO: &str = "http://linux.duke.edu/metadata/repo";

#[derive(Debug, Clone)]
pub struct RepomdRecord {
    pub data_type: String,
    pub checksum_type: String,
    pub checksum: String,
    pub open_checksum: Option<String>,
    pub location_href: String,
    pub timestamp: i64,
    pub size: u64,
    pub open_size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RepomdData {
    pub revision: String,
    pub records: Vec<RepomdRecord>,
}

impl RepomdData {
    pub fn find(&self, data_type: &str) -> Option<&RepomdRecord> {
        self.records.iter().find(|r| r.data_type == data_type)
    }
}

/// Parses `repomd.xml` bytes into its `<data>` records. Tolerant of
/// unknown attributes/elements the way upstream RPM extensions (SUSE's
/// `susedata`, module metadata, …) add them.
pub fn parse(xml: &[u8]) -> Result<RepomdData, RpmPluginError> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut result = RepomdData::default();
    let mut current: Option<RepomdRecord> = None;
    let mut in_checksum = false;
    let mut in_open_checksum = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| RpmPluginError::Xml(e.to_string()))? {
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                let mut data_type = String::new();
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"type" {
                        data_type = String::from_utf8_lossy(&attr.value).to_string();
                    }
                }
                current = Some(RepomdRecord {
                    data_type,
                    checksum_type: String::new(),
                    checksum: String::new(),
                    open_checksum: None,
                    location_href: String::new(),
                    timestamp: 0,
                    size: 0,
                    open_size: None,
                });
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"location" => {
                if let Some(rec) = current.as_mut() {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"href" {
                            rec.location_href = String::from_utf8_lossy(&attr.value).to_string();
                        }
                    }
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"checksum" => {
                if let Some(rec) = current.as_mut() {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"type" {
                            rec.checksum_type = String::from_utf8_lossy(&attr.value).to_string();
                        }
                    }
                }
                in_checksum = true;
            }
            Event::Start(e) if e.local_name().as_ref() == b"open-checksum" => {
                in_open_checksum = true;
            }
            Event::Text(t) if in_checksum => {
                if let Some(rec) = current.as_mut() {
                    rec.checksum = t.unescape().map_err(|e| RpmPluginError::Xml(e.to_string()))?.to_string();
                }
                in_checksum = false;
            }
            Event::Text(t) if in_open_checksum => {
                if let Some(rec) = current.as_mut() {
                    rec.open_checksum =
                        Some(t.unescape().map_err(|e| RpmPluginError::Xml(e.to_string()))?.to_string());
                }
                in_open_checksum = false;
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"timestamp" => {
                let _ = e;
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"size" => {
                let _ = e;
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => {
                if let Some(rec) = current.take() {
                    result.records.push(rec);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(result)
}

/// Computes a `RepomdRecord` for a data file that has just been written:
/// sha256 of the compressed bytes, sha256 of the decompressed bytes,
/// both sizes, and the current unix timestamp.
pub fn record_for(data_type: &str, location_href: &str, compressed: &[u8], decompressed: &[u8], timestamp: i64) -> RepomdRecord {
    let checksum = hex::encode(Sha256::digest(compressed));
    let open_checksum = hex::encode(Sha256::digest(decompressed));
    RepomdRecord {
        data_type: data_type.to_string(),
        checksum_type: "sha256".to_string(),
        checksum,
        open_checksum: Some(open_checksum),
        location_href: location_href.to_string(),
        timestamp,
        size: compressed.len() as u64,
        open_size: Some(decompressed.len() as u64),
    }
}

pub fn write(data: &RepomdData) -> Result<Vec<u8>, RpmPluginError> {
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

    let mut repomd = BytesStart::new("repomd");
    repomd.push_attribute(("xmlns", XML_NS_REPO));
    writer
        .write_event(Event::Start(repomd))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

    writer
        .write_event(Event::Start(BytesStart::new("revision")))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(&data.revision)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new("revision")))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

    for rec in &data.records {
        let mut data_tag = BytesStart::new("data");
        data_tag.push_attribute(("type", rec.data_type.as_str()));
        writer
            .write_event(Event::Start(data_tag))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        let mut checksum = BytesStart::new("checksum");
        checksum.push_attribute(("type", rec.checksum_type.as_str()));
        writer
            .write_event(Event::Start(checksum))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&rec.checksum)))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::End(BytesEnd::new("checksum")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        if let Some(open_checksum) = &rec.open_checksum {
            let mut oc = BytesStart::new("open-checksum");
            oc.push_attribute(("type", rec.checksum_type.as_str()));
            writer
                .write_event(Event::Start(oc))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
            writer
                .write_event(Event::Text(BytesText::new(open_checksum)))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
            writer
                .write_event(Event::End(BytesEnd::new("open-checksum")))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        }

        let mut location = BytesStart::new("location");
        location.push_attribute(("href", rec.location_href.as_str()));
        writer
            .write_event(Event::Empty(location))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        writer
            .write_event(Event::Start(BytesStart::new("timestamp")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&rec.timestamp.to_string())))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::End(BytesEnd::new("timestamp")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        writer
            .write_event(Event::Start(BytesStart::new("size")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&rec.size.to_string())))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::End(BytesEnd::new("size")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        if let Some(open_size) = rec.open_size {
            writer
                .write_event(Event::Start(BytesStart::new("open-size")))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
            writer
                .write_event(Event::Text(BytesText::new(&open_size.to_string())))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
            writer
                .write_event(Event::End(BytesEnd::new("open-size")))
                .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("data")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("repomd")))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    Ok(buf)
}

pub fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn xz_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = xz2::read::XzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
