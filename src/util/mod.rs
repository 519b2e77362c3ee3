//! File-system and image helpers: directory scanning, batch image loading,
//! gamma correction and corner export.

pub mod gamma;

pub use gamma::{build_gamma_lut, gamma_correction};

use image::RgbImage;
use log::{debug, warn};
use nalgebra::Point2;
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("No file names containing '{0}' found")]
    NoMatchingFiles(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Image error: {0}")]
    ImageError(String),
}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::IOError(err.to_string())
    }
}

impl From<image::ImageError> for UtilError {
    fn from(err: image::ImageError) -> Self {
        UtilError::ImageError(err.to_string())
    }
}

impl From<csv::Error> for UtilError {
    fn from(err: csv::Error) -> Self {
        UtilError::IOError(err.to_string())
    }
}

/// Creates `dir` (and its parents) if it does not exist yet.
pub fn ensure_dir<P: AsRef<Path>>(dir: P) -> Result<(), UtilError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            UtilError::IOError(format!("Failed to create directory {}: {e}", dir.display()))
        })?;
    }
    Ok(())
}

/// Joins a folder and a file name.
pub fn concat_paths(folder: &str, file_name: &str) -> String {
    Path::new(folder).join(file_name).to_string_lossy().into_owned()
}

/// Lists the names of the entries of `dir` whose file name contains
/// `file_type`, in directory iteration order.
///
/// Matching is by substring, so `"jpg"` also selects `"a.jpg.bak"`. Names
/// that are not valid UTF-8 are skipped.
///
/// # Errors
///
/// * [`UtilError::IOError`] if the directory cannot be read.
/// * [`UtilError::NoMatchingFiles`] if no entry matches.
pub fn get_file_names(dir: &str, file_type: &str) -> Result<Vec<String>, UtilError> {
    let mut file_names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping {}: file name is not valid UTF-8", raw.to_string_lossy());
                continue;
            }
        };
        if name.contains(file_type) {
            file_names.push(name);
        } else {
            debug!("Skipping {name}: does not contain '{file_type}'");
        }
    }

    if file_names.is_empty() {
        return Err(UtilError::NoMatchingFiles(file_type.to_string()));
    }
    Ok(file_names)
}

/// Load an image from file path as 8-bit RGB.
pub fn load_image(image_path: &str) -> Result<RgbImage, UtilError> {
    let img = image::open(image_path)?;
    Ok(img.to_rgb8())
}

/// Decodes every image in `dir` whose name contains `file_type`.
///
/// Undecodable files are logged and skipped; a scan failure yields an empty
/// batch.
pub fn read_images(dir: &str, file_type: &str) -> Vec<RgbImage> {
    read_images_with_names(dir, file_type).0
}

/// Like [`read_images`], also returning the names of the loaded files in the
/// same order as the images.
pub fn read_images_with_names(dir: &str, file_type: &str) -> (Vec<RgbImage>, Vec<String>) {
    let file_names = match get_file_names(dir, file_type) {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot list images in {dir}: {e}");
            return (Vec::new(), Vec::new());
        }
    };

    let mut images = Vec::with_capacity(file_names.len());
    let mut loaded = Vec::with_capacity(file_names.len());
    for name in file_names {
        let file_path = concat_paths(dir, &name);
        match load_image(&file_path) {
            Ok(img) => {
                images.push(img);
                loaded.push(name);
            }
            Err(e) => warn!("Cannot load image: {file_path} ({e})"),
        }
    }
    (images, loaded)
}

/// Writes detected corners as CSV rows `image,index,u,v`.
///
/// `names[k]` labels `corner_sets[k]`.
pub fn export_corners_csv<P: AsRef<Path>>(
    path: P,
    names: &[String],
    corner_sets: &[Vec<Point2<f64>>],
) -> Result<(), UtilError> {
    if names.len() != corner_sets.len() {
        return Err(UtilError::InvalidParams(format!(
            "{} names for {} corner sets",
            names.len(),
            corner_sets.len()
        )));
    }
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["image", "index", "u", "v"])?;
    for (name, corners) in names.iter().zip(corner_sets.iter()) {
        for (index, corner) in corners.iter().enumerate() {
            writer.write_record([
                name.clone(),
                index.to_string(),
                format!("{:.6}", corner.x),
                format!("{:.6}", corner.y),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::fs::File;

    #[test]
    fn test_get_file_names_matches_substring() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "b.png", "c.jpg.bak", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let dir_str = dir.path().to_str().unwrap();

        let mut names = get_file_names(dir_str, "jpg").unwrap();
        names.sort();
        assert_eq!(names, vec!["a.jpg".to_string(), "c.jpg.bak".to_string()]);

        assert!(matches!(
            get_file_names(dir_str, "tiff"),
            Err(UtilError::NoMatchingFiles(_))
        ));
    }

    #[test]
    fn test_get_file_names_keeps_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["img_3.jpg", "img_1.jpg", "skip.png", "img_10.jpg", "img_2.jpg"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let dir_str = dir.path().to_str().unwrap();

        let expected: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.contains("jpg"))
            .collect();

        assert_eq!(get_file_names(dir_str, "jpg").unwrap(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_get_file_names_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.jpg")).unwrap();
        let raw = OsStr::from_bytes(b"b\xff.jpg");
        if File::create(dir.path().join(raw)).is_err() {
            // Some file systems refuse non-UTF-8 names.
            return;
        }

        let names = get_file_names(dir.path().to_str().unwrap(), "jpg").unwrap();
        assert_eq!(names, vec!["a.jpg".to_string()]);
    }

    #[test]
    fn test_get_file_names_missing_dir() {
        assert!(matches!(
            get_file_names("/definitely/not/here", "jpg"),
            Err(UtilError::IOError(_))
        ));
    }

    #[test]
    fn test_concat_paths() {
        assert_eq!(concat_paths("images", "a.jpg"), "images/a.jpg");
    }

    #[test]
    fn test_read_images_skips_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        img.save(dir.path().join("good_1.png")).unwrap();
        img.save(dir.path().join("good_2.png")).unwrap();
        fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        fs::write(dir.path().join("ignored.txt"), b"text").unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let images = read_images(dir_str, "png");
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|i| i.dimensions() == (8, 6)));

        let (images, mut names) = read_images_with_names(dir_str, "png");
        names.sort();
        assert_eq!(images.len(), 2);
        assert_eq!(names, vec!["good_1.png".to_string(), "good_2.png".to_string()]);
    }

    #[test]
    fn test_read_images_without_matches_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_images(dir.path().to_str().unwrap(), "jpg").is_empty());
    }

    #[test]
    fn test_export_corners_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("corners.csv");
        let names = vec!["a.png".to_string(), "b.png".to_string()];
        let corners = vec![
            vec![Point2::new(1.0, 2.0), Point2::new(3.5, 4.25)],
            vec![Point2::new(5.0, 6.0)],
        ];

        export_corners_csv(&path, &names, &corners).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][0], "a.png");
        assert_eq!(&rows[1][1], "1");
        assert_eq!(rows[1][2].parse::<f64>().unwrap(), 3.5);
        assert_eq!(&rows[2][0], "b.png");

        assert!(export_corners_csv(&path, &names[..1], &corners).is_err());
    }
}
