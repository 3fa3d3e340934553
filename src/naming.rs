use std::path::Path;

use regex::Regex;

/// Result of normalizing one raw archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    pub series: String,
    pub volume: Option<u32>,
}

/// Pure filename normalizer: strips Japanese category tags, extracts a
/// volume number by ordered pattern priority, and sanitizes the remainder.
/// Identical input always yields identical output; no filesystem access.
pub struct NameNormalizer {
    category_tags: Vec<Regex>,
    volume_span_tags: Vec<Regex>,
    volume_patterns: Vec<Regex>,
    leftover_punctuation: Regex,
    whitespace: Regex,
    illegal_chars: Regex,
}

impl NameNormalizer {
    pub fn new() -> Self {
        let category_tags = [
            r"【一般コミック】\s*",
            r"【少年コミック】\s*",
            r"【青年コミック】\s*",
            r"【少女コミック】\s*",
            r"【女性コミック】\s*",
            r"【成年コミック】\s*",
            r"【漫画雑誌】\s*",
            r"\[一般コミック\]\s*",
            r"\[少年コミック\]\s*",
            r"\[青年コミック\]\s*",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect();

        let volume_span_tags = [r"全\d+巻", r"全\d+卷"]
            .iter()
            .map(|pattern| Regex::new(pattern).unwrap())
            .collect();

        // Ordered by priority; the first matching pattern wins. Explicit
        // Japanese volume markers outrank generic Vol./v markers, which
        // outrank bare 2-3 digit tokens.
        let volume_patterns = [
            r"第(\d+)巻",
            r"第(\d+)卷",
            r"[Vv]ol[._\s]*(\d+)",
            r"v(\d+)",
            r"\s+(\d{2,3})\s*",
            r"[_-](\d{2,3})[\._]",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect();

        Self {
            category_tags,
            volume_span_tags,
            volume_patterns,
            leftover_punctuation: Regex::new(r"[「」『』\[\]（）()]").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
            illegal_chars: Regex::new(r#"[<>:"/\\|?*]"#).unwrap(),
        }
    }

    /// Normalizes a raw archive file name into a clean series name and an
    /// optional volume number. The extension is dropped first.
    pub fn normalize(&self, raw_name: &str) -> NormalizedName {
        let stem = Path::new(raw_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(raw_name);

        let mut name = stem.to_string();
        for tag in &self.category_tags {
            name = tag.replace_all(&name, "").into_owned();
        }
        for tag in &self.volume_span_tags {
            name = tag.replace_all(&name, "").into_owned();
        }

        let volume = self.take_volume(&mut name);

        let name = self.leftover_punctuation.replace_all(&name, "");
        let name = self.whitespace.replace_all(&name, " ");
        let name = name.trim().trim_matches([' ', '-', '_']);
        let series = self.illegal_chars.replace_all(name, "").into_owned();

        NormalizedName { series, volume }
    }

    /// Extracts the volume number from the stem of a file name without
    /// touching the rest of the normalization pipeline.
    pub fn extract_volume(&self, raw_name: &str) -> Option<u32> {
        let stem = Path::new(raw_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(raw_name);
        let mut scratch = stem.to_string();
        self.take_volume(&mut scratch)
    }

    /// Builds the canonical container file name for a volume of a series.
    pub fn container_name(&self, series: &str, volume: Option<u32>) -> String {
        let name = match volume {
            Some(volume) => format!("{series} v{volume:02}.cbz"),
            None => format!("{series}.cbz"),
        };
        self.illegal_chars.replace_all(&name, "").into_owned()
    }

    /// Container name for an inner archive that carries no volume marker of
    /// its own; `index` is its 1-based position in the outer archive.
    pub fn positional_container_name(&self, series: &str, index: usize) -> String {
        let name = format!("{series} {index:02}.cbz");
        self.illegal_chars.replace_all(&name, "").into_owned()
    }

    fn take_volume(&self, name: &mut String) -> Option<u32> {
        for pattern in &self.volume_patterns {
            let Some(captures) = pattern.captures(name) else {
                continue;
            };
            let Ok(volume) = captures[1].parse::<u32>() else {
                continue;
            };
            let span = captures.get(0).unwrap().range();
            name.replace_range(span, " ");
            return Some(volume);
        }
        None
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
