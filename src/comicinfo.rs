use std::fs;
use std::path::Path;

use regex::Regex;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::RepackError;
use crate::metadata::MangaMetadata;

const SIDECAR_NAME: &str = "ComicInfo.xml";

/// Builds a ComicInfo sidecar document for one volume. Only fields the
/// metadata actually carries are emitted.
pub fn generate(metadata: &MangaMetadata, volume: Option<u32>) -> String {
    let mut fields: Vec<(&str, String)> = Vec::new();

    fields.push(("Series", metadata.preferred_title().to_string()));
    if let Some(title_ja) = metadata.title_ja.as_deref().filter(|t| !t.is_empty()) {
        fields.push(("LocalizedSeries", title_ja.to_string()));
    }
    if let Some(title_en) = metadata.title_en.as_deref().filter(|t| !t.is_empty()) {
        fields.push(("AlternateSeries", title_en.to_string()));
    }
    if let Some(volume) = volume {
        fields.push(("Number", volume.to_string()));
        fields.push(("Volume", volume.to_string()));
    }
    if let Some(count) = metadata.total_volumes {
        fields.push(("Count", count.to_string()));
    }
    if let Some(author) = metadata.author.as_deref() {
        fields.push(("Writer", author.to_string()));
    }
    if let Some(artist) = metadata.artist.as_deref() {
        fields.push(("Penciller", artist.to_string()));
        fields.push(("Inker", artist.to_string()));
        fields.push(("Colorist", artist.to_string()));
        fields.push(("CoverArtist", artist.to_string()));
    }
    if let Some(publisher) = metadata.publisher.as_deref() {
        fields.push(("Publisher", publisher.to_string()));
    }
    if let Some(date) = metadata.publish_date.as_deref() {
        let mut parts = date.split('-');
        if let Some(year) = parts.next().filter(|y| !y.is_empty()) {
            fields.push(("Year", year.to_string()));
        }
        if let Some(month) = parts.next() {
            fields.push(("Month", month.trim_start_matches('0').to_string()));
        }
        if let Some(day) = parts.next() {
            fields.push(("Day", day.trim_start_matches('0').to_string()));
        }
    }
    if let Some(summary) = metadata.summary.as_deref() {
        let cleaned = strip_html(summary);
        if !cleaned.is_empty() {
            fields.push(("Summary", cleaned));
        }
    }
    if !metadata.tags.is_empty() {
        fields.push(("Tags", metadata.tags.join(", ")));
    }
    fields.push(("LanguageISO", "ja".to_string()));
    fields.push(("Manga", "Yes".to_string()));
    if let Some(source_id) = metadata.source_id.as_deref() {
        fields.push((
            "Notes",
            format!("Source: {}, ID: {source_id}", metadata.source),
        ));
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str(
        "<ComicInfo xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );
    for (tag, value) in fields {
        xml.push_str(&format!("  <{tag}>{}</{tag}>\n", escape_xml(&value)));
    }
    xml.push_str("</ComicInfo>\n");
    xml
}

/// Rewrites a packed container with the sidecar included, replacing any
/// sidecar already present. Existing entries are copied raw so pages are
/// not recompressed; the rewrite goes through a sibling temp file and a
/// rename so the container is never observed half-written.
pub fn embed(container_path: &Path, xml: &str) -> Result<(), RepackError> {
    let embed_error = |message: String| RepackError::SidecarEmbed {
        path: container_path.to_path_buf(),
        message,
    };

    let tmp_path = container_path.with_extension("cbz.tmp");
    {
        let source = fs::File::open(container_path).map_err(|err| embed_error(err.to_string()))?;
        let mut reader =
            zip::ZipArchive::new(source).map_err(|err| embed_error(err.to_string()))?;
        let target =
            fs::File::create(&tmp_path).map_err(|err| embed_error(err.to_string()))?;
        let mut writer = zip::ZipWriter::new(target);

        for index in 0..reader.len() {
            let entry = reader
                .by_index_raw(index)
                .map_err(|err| embed_error(err.to_string()))?;
            if entry.name() == SIDECAR_NAME {
                continue;
            }
            writer
                .raw_copy_file(entry)
                .map_err(|err| embed_error(err.to_string()))?;
        }

        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(SIDECAR_NAME, options)
            .map_err(|err| embed_error(err.to_string()))?;
        std::io::Write::write_all(&mut writer, xml.as_bytes())
            .map_err(|err| embed_error(err.to_string()))?;
        writer
            .finish()
            .map_err(|err| embed_error(err.to_string()))?;
    }

    fs::rename(&tmp_path, container_path).map_err(|err| embed_error(err.to_string()))
}

fn strip_html(text: &str) -> String {
    let tags = Regex::new(r"<[^>]+>").unwrap();
    let without_tags = tags.replace_all(text, "");
    without_tags
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
