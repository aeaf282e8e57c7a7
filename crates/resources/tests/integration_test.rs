//! Loading models and textures from files on disk.

use std::io::Write;

use glam::Vec3;
use night_resources::{Model, ResourceError, TextureData};

#[test]
fn test_load_obj_file() {
    let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
    writeln!(
        file,
        "# unit tetrahedron\nv 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 3 2\nf 1 2 4\nf 1 4 3\nf 2 3 4"
    )
    .unwrap();

    let model = Model::load(file.path()).unwrap();

    assert_eq!(model.triangle_count(), 4);
    assert_eq!(model.vertices.len(), 12);
    assert_eq!(model.indices, (0..12).collect::<Vec<u32>>());
    assert!(model.vertices.iter().all(|v| v.color == Vec3::ONE));
}

#[test]
fn test_missing_obj_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Model::load(&dir.path().join("teapot.obj")).unwrap_err();
    assert!(matches!(err, ResourceError::Io { .. }));
    assert!(err.to_string().contains("teapot.obj"));
}

#[test]
fn test_load_png_texture_as_rgba8() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checker.png");

    let mut rgb = image::RgbImage::new(2, 3);
    rgb.put_pixel(1, 2, image::Rgb([10, 20, 30]));
    rgb.save(&path).unwrap();

    let texture = TextureData::load(&path).unwrap();

    assert_eq!((texture.width, texture.height), (2, 3));
    assert_eq!(texture.pixels.len(), 2 * 3 * 4);
    // Alpha is filled in when the source has none.
    assert_eq!(&texture.pixels[20..24], &[10, 20, 30, 255]);
}

#[test]
fn test_undecodable_texture() {
    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(b"definitely not a png").unwrap();

    let err = TextureData::load(file.path()).unwrap_err();
    assert!(matches!(err, ResourceError::Image { .. }));
}
