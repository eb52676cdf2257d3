//! GeoTIFF encoding and decoding of single-band rasters.

use crate::{GridSpec, Raster, RasterError, Result};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

/// GeoKey: model type (projected or geographic).
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
/// GeoKey: raster type (pixel is area or point).
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
/// GeoKey: EPSG code of a geographic CRS.
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
/// GeoKey: EPSG code of a projected CRS.
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Read a single-band GeoTIFF file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();
    debug!("reading raster {}", path.display());
    let file = File::open(path)?;
    decode(std::io::BufReader::new(file))
}

/// Decode a single-band GeoTIFF from memory.
pub fn read_bytes(bytes: &[u8]) -> Result<Raster> {
    decode(Cursor::new(bytes))
}

/// Write a raster as a single-band `f32` GeoTIFF and flush it to disk.
///
/// The encoding is deterministic: equal rasters produce identical bytes.
pub fn write<P: AsRef<Path>>(path: P, raster: &Raster) -> Result<()> {
    let path = path.as_ref();
    debug!(
        "writing {}x{} raster to {}",
        raster.width(),
        raster.height(),
        path.display()
    );
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode(&mut writer, raster)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Encode a raster as a single-band `f32` GeoTIFF in memory.
pub fn to_bytes(raster: &Raster) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode(&mut cursor, raster)?;
    Ok(cursor.into_inner())
}

fn encode<W: Write + Seek>(writer: &mut W, raster: &Raster) -> Result<()> {
    let grid = raster.grid();
    grid.validate()?;

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image =
        encoder.new_image::<colortype::Gray32Float>(grid.width as u32, grid.height as u32)?;

    let scale = [grid.res_x, grid.res_y, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, grid.min_x, grid.max_y(), 0.0];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;

    if let Some(keys) = raster.crs().and_then(geo_key_directory) {
        image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    }
    if let Some(nodata) = raster.nodata() {
        let text = format_nodata(nodata);
        image.encoder().write_tag(Tag::GdalNodata, text.as_str())?;
    }

    image.write_data(raster.data())?;
    Ok(())
}

fn decode<R: Read + Seek>(reader: R) -> Result<Raster> {
    let mut decoder = Decoder::new(reader)?;

    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.ifd_value_size = 1024 * 1024 * 1024;
    decoder = decoder.with_limits(limits);

    let (width, height) = decoder.dimensions()?;
    let grid = read_grid(&mut decoder, width as usize, height as usize)?;
    let nodata = read_nodata_value(&mut decoder);
    let crs = read_crs(&mut decoder);

    let data = decode_band(&mut decoder)?;
    // Multi-band files interleave samples; only the first band is kept.
    let bands = data.len() / grid.len().max(1);
    let data = if bands > 1 {
        data.into_iter().step_by(bands).collect()
    } else {
        data
    };

    let raster = Raster::from_vec(grid, data, nodata)?;
    Ok(match crs {
        Some(crs) => raster.with_crs(crs),
        None => raster,
    })
}

/// Read the grid geometry from ModelPixelScale and ModelTiepoint.
fn read_grid<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    width: usize,
    height: usize,
) -> Result<GridSpec> {
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| RasterError::InvalidGeoTiff("missing ModelTiepoint tag".into()))?;
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| RasterError::InvalidGeoTiff("missing ModelPixelScale tag".into()))?;

    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(RasterError::InvalidGeoTiff(format!(
            "malformed georeferencing: {} tiepoint and {} scale values",
            tiepoint.len(),
            scale.len()
        )));
    }

    // Tiepoint format: [i, j, k, x, y, z] where (i,j) is the raster position of (x,y)
    let res_x = scale[0];
    let res_y = scale[1];
    let min_x = tiepoint[3] - tiepoint[0] * res_x;
    let max_y = tiepoint[4] + tiepoint[1] * res_y;

    let grid = GridSpec {
        min_x,
        min_y: max_y - height as f64 * res_y,
        width,
        height,
        res_x,
        res_y,
    };
    grid.validate()?;
    Ok(grid)
}

/// Decode the pixel data as `f32`.
fn decode_band<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
    let result = decoder.read_image()?;

    match result {
        DecodingResult::F32(data) => Ok(data),
        DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
    }
}

/// Try to read the nodata value from the GDAL_NODATA tag.
fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|text| text.trim().trim_end_matches('\0').parse().ok())
}

/// Try to read an EPSG code from the GeoKey directory.
fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<String> {
    let keys = decoder.get_tag_u32_vec(Tag::GeoKeyDirectoryTag).ok()?;
    // Header: [version, revision, minor, key count], then 4 values per key
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            let key = entry[0] as u16;
            (key == PROJECTED_CS_TYPE_GEO_KEY || key == GEOGRAPHIC_TYPE_GEO_KEY) && entry[1] == 0
        })
        .map(|entry| format!("EPSG:{}", entry[3]))
}

/// Build a GeoKey directory for an `EPSG:<code>` CRS string.
fn geo_key_directory(crs: &str) -> Option<Vec<u16>> {
    let code: u16 = crs
        .trim()
        .strip_prefix("EPSG:")
        .or_else(|| crs.trim().strip_prefix("epsg:"))?
        .parse()
        .ok()?;

    // EPSG geographic 2D CRS codes live in 4000-4999
    let (model, crs_key) = if (4000..5000).contains(&code) {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
    };

    Some(vec![
        1, 1, 0, 3,
        GT_MODEL_TYPE_GEO_KEY, 0, 1, model,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, code,
    ])
}

fn format_nodata(nodata: f32) -> String {
    if nodata.fract() == 0.0 {
        format!("{}", nodata as i64)
    } else {
        format!("{}", nodata)
    }
}
