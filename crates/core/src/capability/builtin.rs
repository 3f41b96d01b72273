//! Built-in capability descriptors for commonly installed converter tools.

use super::types::{
    Capability, CommandTemplate, FormatSpec, PreserveFeatures, PreserveLevel, ResourceCost,
};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

fn docx() -> FormatSpec {
    FormatSpec::new(DOCX_MIME, &["docx"])
}

fn odt() -> FormatSpec {
    FormatSpec::new("application/vnd.oasis.opendocument.text", &["odt"])
}

fn markdown() -> FormatSpec {
    FormatSpec::new("text/markdown", &["md", "markdown"])
}

fn html() -> FormatSpec {
    FormatSpec::new("text/html", &["html", "htm"])
}

fn pdf() -> FormatSpec {
    FormatSpec::new("application/pdf", &["pdf"])
}

fn png() -> FormatSpec {
    FormatSpec::new("image/png", &["png"])
}

fn jpeg() -> FormatSpec {
    FormatSpec::new("image/jpeg", &["jpg", "jpeg"])
}

fn webp() -> FormatSpec {
    FormatSpec::new("image/webp", &["webp"])
}

fn text() -> FormatSpec {
    FormatSpec::new("text/plain", &["txt"])
}

fn document_preserve() -> PreserveFeatures {
    PreserveFeatures {
        styles: PreserveLevel::Partial,
        formulas: PreserveLevel::Partial,
        ..PreserveFeatures::uniform(PreserveLevel::Full)
    }
}

fn image_preserve() -> PreserveFeatures {
    PreserveFeatures {
        styles: PreserveLevel::Full,
        images: PreserveLevel::Full,
        ..PreserveFeatures::default()
    }
}

fn pandoc(id: &str, name: &str, from: FormatSpec, to: FormatSpec) -> Capability {
    Capability::new(id, name, from, to)
        .with_vendor("John MacFarlane", "3.0.0", "GPL-2.0")
        .with_tools(&["pandoc"])
        .with_preserve(document_preserve())
        .with_limits(Some(300), Some(512))
        .with_command(CommandTemplate::new(
            "pandoc",
            &["{input}", "-o", "{output}"],
        ))
}

fn magick(id: &str, name: &str, from: FormatSpec, to: FormatSpec) -> Capability {
    Capability::new(id, name, from, to)
        .with_vendor("ImageMagick Studio", "7.1.0", "Apache-2.0")
        .with_tools(&["magick"])
        .with_preserve(image_preserve())
        .with_cost(ResourceCost::new(0.6, 0.4, 0.0))
        .with_limits(Some(120), Some(2048))
        .with_parallelism(4)
        .retryable(true)
        .with_command(CommandTemplate::new("magick", &["{input}", "{output}"]))
}

fn ffmpeg(id: &str, name: &str, from: FormatSpec, to: FormatSpec) -> Capability {
    Capability::new(id, name, from, to)
        .with_vendor("FFmpeg team", "6.1", "LGPL-2.1")
        .with_tools(&["ffmpeg"])
        .with_cost(ResourceCost::new(0.9, 0.5, 0.2))
        .with_limits(Some(3600), Some(4096))
        .streaming(true)
        .retryable(true)
        .with_command(CommandTemplate::new(
            "ffmpeg",
            &["-y", "-i", "{input}", "-progress", "pipe:2", "{output}"],
        ))
}

/// The descriptor set registered at startup when built-ins are enabled.
pub fn builtin_capabilities() -> Vec<Capability> {
    vec![
        pandoc("pandoc-docx-md", "Pandoc DOCX to Markdown", docx(), markdown())
            .with_scores(0.9, 0.8)
            .with_cost(ResourceCost::new(0.5, 0.3, 0.0))
            .with_risks(&["styles may be lost"]),
        pandoc("pandoc-docx-pdf", "Pandoc DOCX to PDF", docx(), pdf())
            .with_scores(0.85, 0.7)
            .with_cost(ResourceCost::new(0.7, 0.5, 0.0))
            .with_limits(Some(600), Some(1024))
            .with_risks(&["complex layouts may be distorted"]),
        pandoc("pandoc-md-docx", "Pandoc Markdown to DOCX", markdown(), docx())
            .with_scores(0.88, 0.85)
            .with_cost(ResourceCost::new(0.4, 0.3, 0.0)),
        pandoc("pandoc-md-html", "Pandoc Markdown to HTML", markdown(), html())
            .with_scores(0.95, 0.9)
            .with_cost(ResourceCost::new(0.3, 0.2, 0.0))
            .with_limits(Some(180), Some(256)),
        pandoc("pandoc-html-md", "Pandoc HTML to Markdown", html(), markdown())
            .with_scores(0.8, 0.9)
            .with_cost(ResourceCost::new(0.3, 0.2, 0.0))
            .with_risks(&["inline styles are dropped"]),
        Capability::new("soffice-docx-pdf", "LibreOffice DOCX to PDF", docx(), pdf())
            .with_vendor("The Document Foundation", "7.6", "MPL-2.0")
            .with_scores(0.95, 0.5)
            .with_cost(ResourceCost::new(0.8, 0.7, 0.0))
            .with_tools(&["soffice"])
            .with_preserve(PreserveFeatures::uniform(PreserveLevel::Full))
            .with_limits(Some(600), Some(2048))
            .retryable(true)
            .with_command(CommandTemplate::new(
                "soffice",
                &[
                    "--headless",
                    "--convert-to",
                    "{format}",
                    "--outdir",
                    "{output_dir}",
                    "{input}",
                ],
            )),
        Capability::new("soffice-odt-docx", "LibreOffice ODT to DOCX", odt(), docx())
            .with_vendor("The Document Foundation", "7.6", "MPL-2.0")
            .with_scores(0.9, 0.5)
            .with_cost(ResourceCost::new(0.8, 0.7, 0.0))
            .with_tools(&["soffice"])
            .with_preserve(document_preserve())
            .with_limits(Some(600), Some(2048))
            .with_command(CommandTemplate::new(
                "soffice",
                &[
                    "--headless",
                    "--convert-to",
                    "{format}",
                    "--outdir",
                    "{output_dir}",
                    "{input}",
                ],
            )),
        magick("magick-pdf-png", "ImageMagick PDF to PNG", pdf(), png())
            .with_scores(0.8, 0.6)
            .with_risks(&["only the first page is rasterized", "text becomes pixels"]),
        magick("magick-png-webp", "ImageMagick PNG to WebP", png(), webp())
            .with_scores(0.92, 0.85)
            .with_risks(&["lossy compression"]),
        magick("magick-jpg-png", "ImageMagick JPG to PNG", jpeg(), png()).with_scores(1.0, 0.9),
        magick("magick-png-jpg", "ImageMagick PNG to JPG", png(), jpeg())
            .with_scores(0.85, 0.9)
            .with_risks(&["transparency is flattened", "lossy compression"]),
        Capability::new("tesseract-png-txt", "Tesseract OCR PNG to text", png(), text())
            .with_vendor("Tesseract OCR", "5.3", "Apache-2.0")
            .with_scores(0.75, 0.4)
            .with_cost(ResourceCost::new(0.9, 0.4, 0.0))
            .with_tools(&["tesseract"])
            .with_lang_packs(&["eng"])
            .with_limits(Some(600), Some(1024))
            .with_risks(&["recognition errors on low resolution scans"])
            .with_command(CommandTemplate::new(
                "tesseract",
                &["{input}", "{output_stem}"],
            )),
        ffmpeg(
            "ffmpeg-mp4-webm",
            "FFmpeg MP4 to WebM",
            FormatSpec::new("video/mp4", &["mp4", "m4v"]),
            FormatSpec::new("video/webm", &["webm"]),
        )
        .with_scores(0.85, 0.3),
        ffmpeg(
            "ffmpeg-flac-mp3",
            "FFmpeg FLAC to MP3",
            FormatSpec::new("audio/flac", &["flac"]),
            FormatSpec::new("audio/mpeg", &["mp3"]),
        )
        .with_scores(0.8, 0.8)
        .with_risks(&["lossy encoding"]),
        ffmpeg(
            "ffmpeg-wav-flac",
            "FFmpeg WAV to FLAC",
            FormatSpec::new("audio/wav", &["wav"]),
            FormatSpec::new("audio/flac", &["flac"]),
        )
        .with_scores(1.0, 0.8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_unique() {
        let caps = builtin_capabilities();
        let ids: HashSet<&str> = caps.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), caps.len());
    }

    #[test]
    fn test_builtins_validate() {
        for cap in builtin_capabilities() {
            cap.validate().unwrap();
            assert!(cap.command.is_some(), "{} has no command", cap.id);
        }
    }
}
