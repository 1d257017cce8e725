//! Image persistence: PNG with embedded workflow metadata, plain PNG,
//! JPEG conversion and HD/SD selection.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

use crate::error::CoreError;

/// JPEG quality used for converted HD/SD outputs.
pub const JPEG_QUALITY: u8 = 95;

/// PNG text keyword that carries the submitted workflow (tEXt and iTXt).
pub const PROMPT_KEYWORD: &str = "prompt";

/// PNG text keyword duplicating the workflow for editor compatibility (iTXt).
pub const WORKFLOW_KEYWORD: &str = "workflow";

/// Decode `bytes` and write them as an 8-bit PNG carrying `workflow_json`
/// under a tEXt `prompt` chunk and iTXt `prompt` + `workflow` chunks.
///
/// `workflow_json` is expected to be the ASCII canonical form, which keeps
/// the tEXt chunk valid Latin-1.
pub fn save_png_with_workflow(
    bytes: &[u8],
    path: &Path,
    workflow_json: &str,
) -> Result<(), CoreError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = (decoded.width(), decoded.height());
    let (color, data) = if decoded.color().has_alpha() {
        (png::ColorType::Rgba, decoded.into_rgba8().into_raw())
    } else {
        (png::ColorType::Rgb, decoded.into_rgb8().into_raw())
    };

    let file = File::create(path).map_err(|e| CoreError::io(path, e))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.add_text_chunk(PROMPT_KEYWORD.to_string(), workflow_json.to_string())?;
    encoder.add_itxt_chunk(PROMPT_KEYWORD.to_string(), workflow_json.to_string())?;
    encoder.add_itxt_chunk(WORKFLOW_KEYWORD.to_string(), workflow_json.to_string())?;

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    writer.finish()?;
    Ok(())
}

/// Decode `bytes` and re-encode them as PNG without metadata.
pub fn save_png(bytes: &[u8], path: &Path) -> Result<(), CoreError> {
    let decoded = image::load_from_memory(bytes)?;
    decoded.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// `max(width, height)` of the image stored at `path`.
pub fn longest_side(path: &Path) -> Result<u32, CoreError> {
    let (width, height) = image::image_dimensions(path)?;
    Ok(width.max(height))
}

/// Re-encode `src` as an RGB JPEG at [`JPEG_QUALITY`] into `dest`, then
/// remove `src`.
pub fn convert_to_jpeg_and_remove(src: &Path, dest: &Path) -> Result<(), CoreError> {
    let rgb = image::open(src)?.into_rgb8();

    let file = File::create(dest).map_err(|e| CoreError::io(dest, e))?;
    let mut out = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&rgb)?;
    out.flush().map_err(|e| CoreError::io(dest, e))?;

    std::fs::remove_file(src).map_err(|e| CoreError::io(src, e))?;
    Ok(())
}

/// Outcome of [`select_hd_sd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdSdPair<T> {
    pub hd: T,
    pub sd: T,
}

/// Pick the candidate with the larger longest side as HD.
///
/// On equal sides the first candidate is SD and the second HD. Downstream
/// consumers depend on this ordering being stable.
pub fn select_hd_sd<T>(first: (T, u32), second: (T, u32)) -> HdSdPair<T> {
    let ((first, first_side), (second, second_side)) = (first, second);
    if first_side > second_side {
        HdSdPair { hd: first, sd: second }
    } else {
        HdSdPair { hd: second, sd: first }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 80, 10]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn rgba_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgba([1u8, 2, 3, 128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    // -----------------------------------------------------------------------
    // HD/SD selection
    // -----------------------------------------------------------------------

    #[test]
    fn larger_side_is_hd_in_either_order() {
        assert_eq!(
            select_hd_sd(("a", 1024), ("b", 2048)),
            HdSdPair { hd: "b", sd: "a" }
        );
        assert_eq!(
            select_hd_sd(("b", 2048), ("a", 1024)),
            HdSdPair { hd: "b", sd: "a" }
        );
    }

    #[test]
    fn equal_sides_make_first_sd() {
        assert_eq!(
            select_hd_sd(("first", 512), ("second", 512)),
            HdSdPair { hd: "second", sd: "first" }
        );
    }

    // -----------------------------------------------------------------------
    // PNG metadata
    // -----------------------------------------------------------------------

    #[test]
    fn png_carries_workflow_in_text_and_itxt_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fox_1.png");
        let json = r#"{"3":{"class_type":"easy seed","inputs":{"seed":42}}}"#;

        save_png_with_workflow(&png_bytes(4, 3), &path, json).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        assert_eq!((info.width, info.height), (4, 3));

        let text: Vec<_> = info
            .uncompressed_latin1_text
            .iter()
            .map(|c| (c.keyword.as_str(), c.text.as_str()))
            .collect();
        assert_eq!(text, vec![("prompt", json)]);

        let itxt: Vec<_> = info
            .utf8_text
            .iter()
            .map(|c| (c.keyword.clone(), c.get_text().unwrap()))
            .collect();
        assert_eq!(
            itxt,
            vec![
                ("prompt".to_string(), json.to_string()),
                ("workflow".to_string(), json.to_string()),
            ]
        );

        let decoded: serde_json::Value = serde_json::from_str(text[0].1).unwrap();
        assert_eq!(decoded["3"]["inputs"]["seed"], 42);
    }

    #[test]
    fn png_with_alpha_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpha.png");
        save_png_with_workflow(&rgba_png_bytes(2, 2), &path, "{}").unwrap();

        let reloaded = image::open(&path).unwrap();
        assert!(reloaded.color().has_alpha());
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.png");
        let err = save_png_with_workflow(b"not an image", &path, "{}").unwrap_err();
        assert!(matches!(err, CoreError::Image(_)));
        assert!(!path.exists());
    }

    // -----------------------------------------------------------------------
    // Plain PNG, dimensions and JPEG conversion
    // -----------------------------------------------------------------------

    #[test]
    fn longest_side_of_saved_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        save_png(&png_bytes(30, 12), &path).unwrap();
        assert_eq!(longest_side(&path).unwrap(), 30);
    }

    #[test]
    fn jpeg_conversion_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tmp.png");
        let dest = dir.path().join("out_SD.jpg");
        save_png(&rgba_png_bytes(8, 16), &src).unwrap();

        convert_to_jpeg_and_remove(&src, &dest).unwrap();

        assert!(!src.exists());
        let jpeg = image::open(&dest).unwrap();
        assert_eq!((jpeg.width(), jpeg.height()), (8, 16));
        assert_eq!(image::ImageFormat::from_path(&dest).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn jpeg_conversion_of_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert_to_jpeg_and_remove(
            &dir.path().join("missing.png"),
            &dir.path().join("out.jpg"),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Image(_)));
    }
}
