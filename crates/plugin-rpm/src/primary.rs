//! `primary.xml` parsing and generation: the RPM repodata file carrying
//! one `<package>` element per RPM with its NEVRA, checksum, location,
//! and descriptive fields.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::json;

use crate::RpmPluginError;

pub const XML_NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
pub const XML_NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";

#[derive(Debug, Clone, Default)]
pub struct PrimaryPackage {
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub checksum: String,
    pub checksum_type: String,
    pub location_href: String,
    pub summary: String,
    pub description: String,
    pub license: String,
    pub group: String,
    pub size_package: u64,
    pub size_installed: u64,
}

impl PrimaryPackage {
    pub fn evr(&self) -> String {
        if self.epoch.is_empty() || self.epoch == "0" {
            format!("{}-{}", self.version, self.release)
        } else {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        }
    }

    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        json!({
            "arch": self.arch,
            "epoch": self.epoch,
            "release": self.release,
            "summary": self.summary,
            "description": self.description,
            "license": self.license,
            "group": self.group,
        })
    }
}

/// Parses a decompressed `primary.xml` document into its packages.
/// Tolerant of fields this system doesn't model (files, requires,
/// provides, …) — it reads only the attributes the data model needs.
pub fn parse(xml: &[u8]) -> Result<Vec<PrimaryPackage>, RpmPluginError> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut packages = Vec::new();
    let mut current: Option<PrimaryPackage> = None;
    let mut text_target: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| RpmPluginError::Xml(e.to_string()))? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"package" => current = Some(PrimaryPackage::default()),
                    b"name" => text_target = Some("name"),
                    b"summary" => text_target = Some("summary"),
                    b"description" => text_target = Some("description"),
                    b"arch" => text_target = Some("arch"),
                    b"version" => {
                        if let Some(pkg) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                match attr.key.as_ref() {
                                    b"epoch" => pkg.epoch = attr_string(&attr),
                                    b"ver" => pkg.version = attr_string(&attr),
                                    b"rel" => pkg.release = attr_string(&attr),
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"checksum" => {
                        if let Some(pkg) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"type" {
                                    pkg.checksum_type = attr_string(&attr);
                                }
                            }
                        }
                        text_target = Some("checksum");
                    }
                    b"location" => {
                        if let Some(pkg) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"href" {
                                    pkg.location_href = attr_string(&attr);
                                }
                            }
                        }
                    }
                    b"size" => {
                        if let Some(pkg) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                match attr.key.as_ref() {
                                    b"package" => pkg.size_package = attr_string(&attr).parse().unwrap_or(0),
                                    b"installed" => pkg.size_installed = attr_string(&attr).parse().unwrap_or(0),
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"license" => text_target = Some("license"),
                    b"group" => text_target = Some("group"),
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let (Some(target), Some(pkg)) = (text_target, current.as_mut()) {
                    let text = t.unescape().map_err(|e| RpmPluginError::Xml(e.to_string()))?.to_string();
                    match target {
                        "name" => pkg.name = text,
                        "summary" => pkg.summary = text,
                        "description" => pkg.description = text,
                        "arch" => pkg.arch = text,
                        "checksum" => pkg.checksum = text,
                        "license" => pkg.license = text,
                        "group" => pkg.group = text,
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"package" {
                    if let Some(pkg) = current.take() {
                        packages.push(pkg);
                    }
                }
                text_target = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(packages)
}

fn attr_string(attr: &quick_xml::events::attributes::Attribute<'_>) -> String {
    String::from_utf8_lossy(&attr.value).to_string()
}

/// Regenerates `primary.xml` from a filtered item set. Only the fields
/// the data model tracks are emitted; clients (`dnf`) tolerate a primary
/// document narrower than upstream's as long as `packages="N"` matches.
pub fn write(packages: &[PrimaryPackage]) -> Result<Vec<u8>, RpmPluginError> {
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

    let mut metadata = BytesStart::new("metadata");
    metadata.push_attribute(("xmlns", XML_NS_COMMON));
    metadata.push_attribute(("xmlns:rpm", XML_NS_RPM));
    metadata.push_attribute(("packages", packages.len().to_string().as_str()));
    writer
        .write_event(Event::Start(metadata))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

    for pkg in packages {
        let mut package = BytesStart::new("package");
        package.push_attribute(("type", "rpm"));
        writer
            .write_event(Event::Start(package))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        write_text(&mut writer, "name", &pkg.name)?;
        write_text(&mut writer, "arch", &pkg.arch)?;

        let mut version = BytesStart::new("version");
        version.push_attribute(("epoch", pkg.epoch.as_str()));
        version.push_attribute(("ver", pkg.version.as_str()));
        version.push_attribute(("rel", pkg.release.as_str()));
        writer
            .write_event(Event::Empty(version))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        let mut checksum = BytesStart::new("checksum");
        checksum.push_attribute(("type", pkg.checksum_type.as_str()));
        checksum.push_attribute(("pkgid", "YES"));
        writer
            .write_event(Event::Start(checksum))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&pkg.checksum)))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new("checksum")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        write_text(&mut writer, "summary", &pkg.summary)?;
        write_text(&mut writer, "description", &pkg.description)?;

        let mut location = BytesStart::new("location");
        location.push_attribute(("href", pkg.location_href.as_str()));
        writer
            .write_event(Event::Empty(location))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        let mut size = BytesStart::new("size");
        size.push_attribute(("package", pkg.size_package.to_string().as_str()));
        size.push_attribute(("installed", pkg.size_installed.to_string().as_str()));
        writer
            .write_event(Event::Empty(size))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;

        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new("package")))
            .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    }

    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("metadata")))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    Ok(buf)
}

fn write_text(
    writer: &mut Writer<&mut Vec<u8>>,
    tag: &str,
    text: &str,
) -> Result<(), RpmPluginError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new(tag)))
        .map_err(|e| RpmPluginError::Xml(e.to_string()))?;
    Ok(())
}
