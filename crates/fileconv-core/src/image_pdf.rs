//! Image → PDF capability
//!
//! Decodes a JPEG/PNG, flattens it to 8-bit RGB and embeds it as a single
//! Flate-compressed image XObject on one page sized to the image
//! (one pixel per point).

use std::io::{Cursor, Write};
use std::path::Path;

use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::ImageReader;
use lopdf::{Dictionary, Document, Object, Stream};

use crate::capability::Capability;
use crate::error::CapabilityError;

/// In-process image encoder.
pub struct ImageToPdf;

#[async_trait]
impl Capability for ImageToPdf {
    fn name(&self) -> &'static str {
        "image-to-pdf"
    }

    fn target_extension(&self) -> &'static str {
        "pdf"
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError> {
        let bytes = tokio::fs::read(input).await?;
        let pdf = tokio::task::spawn_blocking(move || render_image_pdf(&bytes))
            .await
            .map_err(|e| CapabilityError::Failed(format!("image task panicked: {}", e)))??;
        tokio::fs::write(output, pdf).await?;
        Ok(())
    }
}

/// Encode image bytes (any format `image` can sniff) as a one-page PDF.
pub fn render_image_pdf(bytes: &[u8]) -> Result<Vec<u8>, CapabilityError> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CapabilityError::Failed(format!("cannot read image: {}", e)))?
        .decode()
        .map_err(|e| CapabilityError::Failed(format!("cannot decode image: {}", e)))?;

    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(CapabilityError::Failed("image has no pixels".into()));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(rgb.as_raw())?;
    let pixels = encoder.finish()?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let catalog_id = doc.new_object_id();
    let page_id = doc.new_object_id();
    let image_id = doc.new_object_id();
    let content_id = doc.new_object_id();

    let mut image_dict = Dictionary::new();
    image_dict.set("Type", Object::Name(b"XObject".to_vec()));
    image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    image_dict.set("Width", Object::Integer(width as i64));
    image_dict.set("Height", Object::Integer(height as i64));
    image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    image_dict.set("BitsPerComponent", Object::Integer(8));
    image_dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    doc.objects.insert(
        image_id,
        Object::Stream(Stream::new(image_dict, pixels).with_compression(false)),
    );

    // Scale the unit square to the page and paint the image.
    let content = format!("q {} 0 0 {} 0 0 cm /Im0 Do Q", width, height);
    doc.objects.insert(
        content_id,
        Object::Stream(Stream::new(Dictionary::new(), content.into_bytes())),
    );

    let mut xobjects = Dictionary::new();
    xobjects.set("Im0", Object::Reference(image_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut page_dict = Dictionary::new();
    page_dict.set("Type", Object::Name(b"Page".to_vec()));
    page_dict.set("Parent", Object::Reference(pages_id));
    page_dict.set("Resources", Object::Dictionary(resources));
    page_dict.set("Contents", Object::Reference(content_id));
    page_dict.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width as i64),
            Object::Integer(height as i64),
        ]),
    );
    doc.objects.insert(page_id, Object::Dictionary(page_dict));

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(1));
    pages_dict.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog_dict = Dictionary::new();
    catalog_dict.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog_dict.set("Pages", Object::Reference(pages_id));
    doc.objects
        .insert(catalog_id, Object::Dictionary(catalog_dict));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| CapabilityError::Failed(format!("failed to write PDF: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: impl Into<image::DynamicImage>, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.into().write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn media_box(doc: &Document) -> Vec<i64> {
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        page.get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_png_becomes_single_page_sized_to_image() {
        let png = encode(RgbImage::from_pixel(40, 25, Rgb([200, 10, 10])), ImageFormat::Png);
        let pdf = render_image_pdf(&png).unwrap();

        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(media_box(&doc), vec![0, 0, 40, 25]);
    }

    #[test]
    fn test_jpeg_is_accepted() {
        let jpeg = encode(RgbImage::from_pixel(16, 16, Rgb([0, 128, 255])), ImageFormat::Jpeg);
        let pdf = render_image_pdf(&jpeg).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_alpha_channel_is_flattened() {
        let png = encode(
            RgbaImage::from_pixel(8, 4, Rgba([10, 20, 30, 128])),
            ImageFormat::Png,
        );
        let pdf = render_image_pdf(&png).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(media_box(&doc), vec![0, 0, 8, 4]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = render_image_pdf(b"definitely not an image").unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));
    }

    #[tokio::test]
    async fn test_capability_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        let output = dir.path().join("photo_converted.pdf");
        std::fs::write(
            &input,
            encode(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])), ImageFormat::Png),
        )
        .unwrap();

        ImageToPdf.convert(&input, &output).await.unwrap();
        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
