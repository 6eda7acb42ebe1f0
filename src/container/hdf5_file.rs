//! HDF5 container files.
//!
//! Only available with the `storage_hdf5` feature; without it [`Hdf5Provider::open`]
//! fails with [`RecorderError::FeatureNotEnabled`].

use super::{Container, ContainerProvider, OpenMode};
use crate::error::{RecorderError, RecorderResult};
use std::path::Path;

/// Opens HDF5 files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Provider;

impl ContainerProvider for Hdf5Provider {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    #[cfg(feature = "storage_hdf5")]
    fn open(&self, path: &Path, mode: OpenMode) -> RecorderResult<Box<dyn Container>> {
        Ok(Box::new(imp::Hdf5Container::open(path, mode)?))
    }

    #[cfg(not(feature = "storage_hdf5"))]
    fn open(&self, _path: &Path, _mode: OpenMode) -> RecorderResult<Box<dyn Container>> {
        Err(RecorderError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

#[cfg(feature = "storage_hdf5")]
mod imp {
    use super::super::{AttrValue, Container, DatasetSpec, FieldValue, OpenMode};
    use crate::descriptor::ElementType;
    use crate::error::{RecorderError, RecorderResult};
    use hdf5::types::VarLenUnicode;
    use hdf5::{Extent, Extents, File, Hyperslab, Location, SimpleExtents, SliceOrIndex};
    use ndarray::{ArrayD, IxDyn};
    use std::path::{Path, PathBuf};

    /// Runs `$body` with `$T` bound to the Rust type of a storage element type.
    macro_rules! with_storage_type {
        ($dtype:expr, $T:ident => $body:expr) => {
            match $dtype {
                ElementType::Float32 => {
                    type $T = f32;
                    $body
                }
                ElementType::Float64 => {
                    type $T = f64;
                    $body
                }
                ElementType::Int8 | ElementType::Bool => {
                    type $T = i8;
                    $body
                }
                ElementType::Int16 => {
                    type $T = i16;
                    $body
                }
                ElementType::Int32 => {
                    type $T = i32;
                    $body
                }
                ElementType::Int64 => {
                    type $T = i64;
                    $body
                }
                ElementType::UInt8 => {
                    type $T = u8;
                    $body
                }
                ElementType::UInt16 => {
                    type $T = u16;
                    $body
                }
                ElementType::UInt32 => {
                    type $T = u32;
                    $body
                }
                ElementType::UInt64 => {
                    type $T = u64;
                    $body
                }
                ElementType::Unsupported(name) => {
                    return Err(RecorderError::Container(format!(
                        "element type '{name}' cannot be stored"
                    )))
                }
            }
        };
    }

    fn text(value: &str) -> RecorderResult<VarLenUnicode> {
        value
            .parse::<VarLenUnicode>()
            .map_err(|e| RecorderError::Container(format!("invalid text '{value}': {e}")))
    }

    pub struct Hdf5Container {
        path: PathBuf,
        file: Option<File>,
    }

    impl Hdf5Container {
        pub fn open(path: &Path, mode: OpenMode) -> RecorderResult<Self> {
            let file = match mode {
                OpenMode::Create => File::create(path)?,
                OpenMode::ReadWrite => File::append(path)?,
            };
            Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
            })
        }

        fn file(&self) -> RecorderResult<&File> {
            self.file
                .as_ref()
                .ok_or_else(|| RecorderError::Container(format!("{} is closed", self.path.display())))
        }

        fn location(&self, path: &str) -> RecorderResult<Location> {
            let file = self.file()?;
            if let Ok(group) = file.group(path) {
                return Ok((*group).clone());
            }
            let dataset = file.dataset(path)?;
            Ok((**dataset).clone())
        }
    }

    impl Container for Hdf5Container {
        fn file_path(&self) -> &Path {
            &self.path
        }

        fn exists(&self, path: &str) -> bool {
            let Ok(file) = self.file() else {
                return false;
            };
            let mut prefix = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                prefix.push('/');
                prefix.push_str(segment);
                if !file.link_exists(&prefix) {
                    return false;
                }
            }
            true
        }

        fn create_group(&mut self, path: &str, class: &str) -> RecorderResult<()> {
            let group = self.file()?.create_group(path)?;
            group
                .new_attr::<VarLenUnicode>()
                .create("NX_class")?
                .write_scalar(&text(class)?)?;
            Ok(())
        }

        fn children(&self, path: &str) -> RecorderResult<Vec<String>> {
            Ok(self.file()?.group(path)?.member_names()?)
        }

        fn create_dataset(&mut self, spec: &DatasetSpec) -> RecorderResult<()> {
            let file = self.file()?;
            let dims: Vec<Extent> = std::iter::once(Extent::resizable(0))
                .chain(spec.shape.iter().map(|&n| Extent::fixed(n)))
                .collect();
            let extents = Extents::Simple(SimpleExtents::new(dims));
            with_storage_type!(&spec.dtype, T => {
                let builder = file.new_dataset::<T>().chunk(spec.chunk());
                let builder = match spec.compression {
                    Some(level) => builder.deflate(level),
                    None => builder,
                };
                builder.shape(extents).create(spec.path.as_str())?;
            });
            Ok(())
        }

        fn write_field(&mut self, path: &str, value: &FieldValue) -> RecorderResult<()> {
            let file = self.file()?;
            match value {
                FieldValue::Text(value) => {
                    file.new_dataset::<VarLenUnicode>()
                        .create(path)?
                        .write_scalar(&text(value)?)?;
                }
                FieldValue::Number { dtype, shape, data } => {
                    with_storage_type!(dtype, T => {
                        let converted: Vec<T> = data.iter().map(|v| *v as T).collect();
                        file.new_dataset::<T>()
                            .shape(shape.clone())
                            .create(path)?
                            .write_raw(&converted)?;
                    });
                }
            }
            Ok(())
        }

        fn write_slab(&mut self, path: &str, index: u64, data: &[f64]) -> RecorderResult<()> {
            let dataset = self.file()?.dataset(path)?;
            let mut shape = dataset.shape();
            let point_shape: Vec<usize> = shape.iter().skip(1).copied().collect();
            let expected: usize = point_shape.iter().product();
            if data.len() != expected {
                return Err(RecorderError::ShapeMismatch {
                    label: super::super::basename(path).to_string(),
                    expected,
                    got: data.len(),
                });
            }
            let index = usize::try_from(index)
                .map_err(|_| RecorderError::Container(format!("point {index} out of range")))?;
            if shape.first().map_or(true, |&points| index >= points) {
                shape[0] = index + 1;
                dataset.resize(shape)?;
            }

            let selection: Vec<SliceOrIndex> = std::iter::once(SliceOrIndex::Index(index))
                .chain(point_shape.iter().map(|&n| SliceOrIndex::from(0..n)))
                .collect();
            let dtype = ElementType::from(dataset.dtype()?.to_descriptor()?.to_string());
            with_storage_type!(&dtype, T => {
                let converted: Vec<T> = data.iter().map(|v| *v as T).collect();
                let array = ArrayD::from_shape_vec(IxDyn(&point_shape), converted)
                    .map_err(|e| RecorderError::Container(e.to_string()))?;
                dataset.write_slice(&array, Hyperslab::from(selection))?;
            });
            Ok(())
        }

        fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> RecorderResult<()> {
            let location = self.location(path)?;
            match value {
                AttrValue::Text(value) => location
                    .new_attr::<VarLenUnicode>()
                    .create(name)?
                    .write_scalar(&text(value)?)?,
                AttrValue::Int(value) => location.new_attr::<i64>().create(name)?.write_scalar(value)?,
                AttrValue::Float(value) => {
                    location.new_attr::<f64>().create(name)?.write_scalar(value)?
                }
            }
            Ok(())
        }

        fn link(&mut self, target: &str, link_path: &str) -> RecorderResult<()> {
            self.file()?.link_hard(target, link_path)?;
            Ok(())
        }

        fn flush(&mut self) -> RecorderResult<()> {
            self.file()?.flush()?;
            Ok(())
        }

        fn close(&mut self) -> RecorderResult<()> {
            if let Some(file) = self.file.take() {
                file.close()?;
            }
            Ok(())
        }
    }
}


#[cfg(all(test, feature = "storage_hdf5"))]
mod tests {
    use super::*;
    use crate::container::{DatasetSpec, FieldValue};
    use crate::descriptor::ElementType;

    #[test]
    fn writes_extensible_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.h5");
        let mut c = Hdf5Provider.open(&path, OpenMode::Create).unwrap();
        c.create_group("/entry1", "NXentry").unwrap();
        c.write_field("/entry1/title", &FieldValue::text("ascan")).unwrap();
        c.create_dataset(&DatasetSpec {
            path: "/entry1/ct01".into(),
            dtype: ElementType::Float64,
            shape: vec![],
            compression: None,
        })
        .unwrap();
        c.write_slab("/entry1/ct01", 1, &[2.5]).unwrap();
        assert!(c.exists("/entry1/ct01"));
        c.close().unwrap();

        let file = hdf5::File::open(&path).unwrap();
        let values: Vec<f64> = file.dataset("/entry1/ct01").unwrap().read_raw().unwrap();
        assert_eq!(values, vec![0.0, 2.5]);
    }
}
