//! Persistence for complex frequency data.
//!
//! Binary layout (little endian, version 6): a 68-byte header of magic
//! `"PCC\0"`, type `"CFD\0"`, version, header size, scan number, retention
//! time, two calibration doubles, observation duration, noise floor, record
//! size and record count, followed by `record_count` 24-byte records of
//! `(frequency, real, imaginary)`. Readers reject any file whose magic,
//! type, version, header size or record size does not match exactly.
//!
//! The text alternative is one whitespace-separated `frequency real
//! imaginary` triple per line; it carries no header, so the observation
//! duration is re-estimated from the data on read.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::chemistry::calibration::CalibrationParameters;
use crate::data::spectrum::{Complex64, FrequencyDatum, FrequencySpectrum};
use crate::error::{FtmError, Result};

const MAGIC: &[u8; 4] = b"PCC\0";
const TYPE: &[u8; 4] = b"CFD\0";
const VERSION: i32 = 6;
const HEADER_SIZE: i32 = 68;
const RECORD_SIZE: i32 = 24;

/// Reads a spectrum from a file, sniffing the magic bytes to decide between
/// the binary and text formats.
pub fn read_spectrum<P: AsRef<Path>>(path: P) -> Result<FrequencySpectrum> {
    let bytes = std::fs::read(path)?;
    if bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC {
        read_binary(&mut Cursor::new(bytes))
    } else {
        read_text(&mut bytes.as_slice())
    }
}

/// Writes a spectrum to a file in the binary format.
pub fn write_spectrum<P: AsRef<Path>>(path: P, spectrum: &FrequencySpectrum) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_binary(&mut writer, spectrum)
}

/// Reads the binary format from a stream.
pub fn read_binary<R: Read>(reader: &mut R) -> Result<FrequencySpectrum> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    let mut kind = [0u8; 4];
    reader.read_exact(&mut kind)?;
    let version = reader.read_i32::<LittleEndian>()?;
    let header_size = reader.read_i32::<LittleEndian>()?;
    let scan_number = reader.read_i32::<LittleEndian>()?;
    let retention_time = reader.read_f64::<LittleEndian>()?;
    let calibration_a = reader.read_f64::<LittleEndian>()?;
    let calibration_b = reader.read_f64::<LittleEndian>()?;
    let observation_duration = reader.read_f64::<LittleEndian>()?;
    let noise_floor = reader.read_f64::<LittleEndian>()?;
    let record_size = reader.read_i32::<LittleEndian>()?;
    let record_count = reader.read_i32::<LittleEndian>()?;

    if &magic != MAGIC
        || &kind != TYPE
        || version != VERSION
        || header_size != HEADER_SIZE
        || record_size != RECORD_SIZE
        || record_count < 0
    {
        return Err(FtmError::InvalidHeader);
    }

    let mut data = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        let frequency = reader.read_f64::<LittleEndian>()?;
        let real = reader.read_f64::<LittleEndian>()?;
        let imaginary = reader.read_f64::<LittleEndian>()?;
        data.push(FrequencyDatum::new(frequency, Complex64::new(real, imaginary)));
    }

    Ok(FrequencySpectrum::with_metadata(
        data,
        scan_number,
        retention_time,
        CalibrationParameters::new(calibration_a, calibration_b),
        observation_duration,
        noise_floor,
    ))
}

/// Writes the binary format to a stream.
pub fn write_binary<W: Write>(writer: &mut W, spectrum: &FrequencySpectrum) -> Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(TYPE)?;
    writer.write_i32::<LittleEndian>(VERSION)?;
    writer.write_i32::<LittleEndian>(HEADER_SIZE)?;
    writer.write_i32::<LittleEndian>(spectrum.scan_number)?;
    writer.write_f64::<LittleEndian>(spectrum.retention_time)?;
    writer.write_f64::<LittleEndian>(spectrum.calibration.a)?;
    writer.write_f64::<LittleEndian>(spectrum.calibration.b)?;
    writer.write_f64::<LittleEndian>(spectrum.observation_duration)?;
    writer.write_f64::<LittleEndian>(spectrum.noise_floor)?;
    writer.write_i32::<LittleEndian>(RECORD_SIZE)?;
    writer.write_i32::<LittleEndian>(spectrum.data.len() as i32)?;

    for datum in &spectrum.data {
        writer.write_f64::<LittleEndian>(datum.frequency)?;
        writer.write_f64::<LittleEndian>(datum.intensity.re)?;
        writer.write_f64::<LittleEndian>(datum.intensity.im)?;
    }
    Ok(())
}

/// Reads the text format from a stream; the observation duration is
/// estimated from the data since the format carries no header.
pub fn read_text<R: Read>(reader: &mut R) -> Result<FrequencySpectrum> {
    let mut data = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let parsed: Option<(f64, f64, f64)> = match fields.as_slice() {
            [frequency, real, imaginary] => {
                match (frequency.parse(), real.parse(), imaginary.parse()) {
                    (Ok(f), Ok(re), Ok(im)) => Some((f, re, im)),
                    _ => None,
                }
            }
            _ => None,
        };
        let (frequency, real, imaginary) =
            parsed.ok_or(FtmError::MalformedTextRecord { line: line.clone() })?;
        data.push(FrequencyDatum::new(frequency, Complex64::new(real, imaginary)));
    }

    let mut spectrum = FrequencySpectrum::new(data);
    spectrum.observation_duration = spectrum.observation_duration_estimated_from_data();
    Ok(spectrum)
}

/// Writes the text format to a stream. `f64` display output round-trips
/// exactly through `parse`.
pub fn write_text<W: Write>(writer: &mut W, spectrum: &FrequencySpectrum) -> Result<()> {
    for datum in &spectrum.data {
        writeln!(writer, "{} {} {}", datum.frequency, datum.intensity.re, datum.intensity.im)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spectrum() -> FrequencySpectrum {
        let data = vec![
            FrequencyDatum::new(100.125, Complex64::new(1.5, -2.25)),
            FrequencyDatum::new(100.375, Complex64::new(0.0, 3.0)),
            FrequencyDatum::new(100.625, Complex64::new(-4.5, 0.125)),
        ];
        FrequencySpectrum::with_metadata(
            data,
            17,
            321.5,
            CalibrationParameters::thermo_ft(),
            0.768,
            2.5,
        )
    }

    #[test]
    fn test_binary_round_trip_is_exact() {
        let original = sample_spectrum();
        let mut buffer = Vec::new();
        write_binary(&mut buffer, &original).unwrap();
        assert_eq!(buffer.len(), HEADER_SIZE as usize + RECORD_SIZE as usize * 3);

        let restored = read_binary(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(restored.scan_number, original.scan_number);
        assert_eq!(restored.retention_time, original.retention_time);
        assert_eq!(restored.calibration, original.calibration);
        assert_eq!(restored.observation_duration, original.observation_duration);
        assert_eq!(restored.noise_floor, original.noise_floor);
        assert_eq!(restored.data, original.data);
    }

    #[test]
    fn test_binary_header_layout() {
        let mut buffer = Vec::new();
        write_binary(&mut buffer, &sample_spectrum()).unwrap();
        assert_eq!(&buffer[0..4], b"PCC\0");
        assert_eq!(&buffer[4..8], b"CFD\0");
        assert_eq!(&buffer[8..12], 6i32.to_le_bytes());
        assert_eq!(&buffer[12..16], 68i32.to_le_bytes());
    }

    #[test]
    fn test_binary_rejects_bad_magic() {
        let mut buffer = Vec::new();
        write_binary(&mut buffer, &sample_spectrum()).unwrap();
        buffer[0] = b'X';
        assert!(matches!(
            read_binary(&mut Cursor::new(buffer)),
            Err(FtmError::InvalidHeader)
        ));
    }

    #[test]
    fn test_binary_rejects_wrong_version() {
        let mut buffer = Vec::new();
        write_binary(&mut buffer, &sample_spectrum()).unwrap();
        buffer[8..12].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            read_binary(&mut Cursor::new(buffer)),
            Err(FtmError::InvalidHeader)
        ));
    }

    #[test]
    fn test_text_round_trip() {
        let original = sample_spectrum();
        let mut buffer = Vec::new();
        write_text(&mut buffer, &original).unwrap();
        let restored = read_text(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored.data, original.data);
        // no header in the text format: duration comes from the data
        let expected = original.observation_duration_estimated_from_data();
        assert_eq!(restored.observation_duration, expected);
    }

    #[test]
    fn test_text_rejects_malformed_line() {
        let text = b"100.0 1.0 0.0\nnot a record\n";
        assert!(matches!(
            read_text(&mut text.as_slice()),
            Err(FtmError::MalformedTextRecord { .. })
        ));
    }
}
