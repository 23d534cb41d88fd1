//! Camera trajectory text files.
//!
//! One frame per line: `idx tx ty tz qx qy qz qw`, camera-to-world. Blank
//! lines and `#` comments are skipped.

use crate::resource_error;
use scan_core::{Error, Pose, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn read_trajectory<R: BufRead>(reader: R) -> Result<Vec<Pose>> {
    let mut poses = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let number = number + 1;

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(Error::ParseError(format!(
                "line {number}: expected 8 fields (idx tx ty tz qx qy qz qw), got {}",
                fields.len()
            )));
        }
        fields[0].parse::<usize>().map_err(|_| {
            Error::ParseError(format!("line {number}: invalid frame index '{}'", fields[0]))
        })?;
        let mut v = [0.0f64; 7];
        for (slot, field) in v.iter_mut().zip(&fields[1..]) {
            *slot = field.parse().map_err(|_| {
                Error::ParseError(format!("line {number}: invalid number '{field}'"))
            })?;
        }

        let [tx, ty, tz, qx, qy, qz, qw] = v;
        let pose = Pose::from_list(&[tx, ty, tz, qw, qx, qy, qz])
            .map_err(|e| Error::ParseError(format!("line {number}: {e}")))?;
        poses.push(pose);
    }
    Ok(poses)
}

pub fn write_trajectory<W: Write>(writer: &mut W, poses: &[Pose]) -> Result<()> {
    for (idx, pose) in poses.iter().enumerate() {
        let [tx, ty, tz, qw, qx, qy, qz] = pose.to_list();
        writeln!(writer, "{idx} {tx} {ty} {tz} {qx} {qy} {qz} {qw}")?;
    }
    Ok(())
}

pub fn load_trajectory(path: impl AsRef<Path>) -> Result<Vec<Pose>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| resource_error(path, e))?;
    read_trajectory(BufReader::new(file))
}

pub fn save_trajectory(path: impl AsRef<Path>, poses: &[Pose]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| resource_error(path, e))?;
    let mut writer = BufWriter::new(file);
    write_trajectory(&mut writer, poses)?;
    writer.flush()?;
    tracing::debug!(path = %path.display(), frames = poses.len(), "wrote trajectory");
    Ok(())
}
