use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A delimited text table with its header
pub struct DelimitedTable {
    pub header: Vec<Box<str>>,
    /// `(1-based line number, fields)` for every data line
    pub rows: Vec<(usize, Vec<Box<str>>)>,
}

impl DelimitedTable {
    /// Position of a named column
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.as_ref() == name)
    }
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

fn split_fields(line: &str, delim: char) -> Vec<Box<str>> {
    line.split(delim)
        .map(|x| x.trim().trim_matches('"').to_owned().into_boxed_str())
        .collect()
}

///
/// Read a comma- or tab-delimited table with a header on the first
/// non-comment line. The delimiter is whichever of `\t` and `,` the
/// header contains.
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_delimited_table(input_file: &str) -> anyhow::Result<DelimitedTable> {
    let buf = open_buf_reader(input_file)?;
    read_delimited_from(buf)
}

pub fn read_delimited_from(buf: impl BufRead) -> anyhow::Result<DelimitedTable> {
    let mut header: Option<Vec<Box<str>>> = None;
    let mut delim = ',';
    let mut rows = vec![];

    for (i, line) in buf.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        match header {
            None => {
                delim = if line.contains('\t') { '\t' } else { ',' };
                header = Some(split_fields(&line, delim));
            }
            Some(_) => rows.push((i + 1, split_fields(&line, delim))),
        }
    }

    let header = header.ok_or(anyhow::anyhow!("no header line"))?;
    Ok(DelimitedTable { header, rows })
}

///
/// Write every line into the output_file
///
/// * `lines` - anything displayable, one per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_types<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_comma_and_tab() -> anyhow::Result<()> {
        let csv = "a,b,c\n1,2,3\n\n# comment\n4,\"5\",6\n";
        let table = read_delimited_from(csv.as_bytes())?;
        assert_eq!(table.header.len(), 3);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].0, 5);
        assert_eq!(table.rows[1].1[1].as_ref(), "5");
        assert_eq!(table.column("c"), Some(2));

        let tsv = "a\tb\nx,y\tz\n";
        let table = read_delimited_from(tsv.as_bytes())?;
        assert_eq!(table.rows[0].1[0].as_ref(), "x,y");
        Ok(())
    }

    #[test]
    fn test_gz_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("sub/table.tsv.gz");
        let file = file.to_str().unwrap();
        mkdir(file)?;
        write_types(&["x\ty".to_string(), "1\t2".to_string()], file)?;
        let table = read_delimited_table(file)?;
        assert_eq!(table.header[1].as_ref(), "y");
        assert_eq!(table.rows[0].1[0].as_ref(), "1");
        Ok(())
    }
}
