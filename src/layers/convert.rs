use anyhow::{anyhow, Context, Result};
use std::fs;
use std::panic;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConvertTally {
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConvertOutcome {
    NoPdfs,
    Finished(ConvertTally),
}

/// `*.pdf` files directly inside `dir`, sorted by name.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut pdfs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "pdf"))
        .collect();
    pdfs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(pdfs)
}

/// Extracts the text layer of a PDF. The extractor can panic on malformed
/// input, so panics are turned into errors.
pub fn pdf_to_text(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    match panic::catch_unwind(move || pdf_extract::extract_text(&owned)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(anyhow!("{:?}", e)),
        Err(_) => Err(anyhow!("pdf extractor panicked")),
    }
}

/// Converts every PDF in `pdf_dir` to `txt_dir/<stem>.txt`, skipping files
/// that were already converted.
pub fn convert_dir(pdf_dir: &Path, txt_dir: &Path) -> Result<ConvertOutcome> {
    fs::create_dir_all(txt_dir).with_context(|| format!("failed to create {}", txt_dir.display()))?;

    let pdfs = list_pdfs(pdf_dir)?;
    if pdfs.is_empty() {
        return Ok(ConvertOutcome::NoPdfs);
    }

    println!(
        "Converting {} PDFs from '{}' -> '{}'\n",
        pdfs.len(),
        pdf_dir.display(),
        txt_dir.display()
    );

    let mut tally = ConvertTally::default();
    let total = pdfs.len();
    for (i, pdf_path) in pdfs.iter().enumerate() {
        let stem = pdf_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let txt_path = txt_dir.join(format!("{}.txt", stem));

        if txt_path.exists() {
            println!("[{:>4}/{}] skip   {}.txt", i + 1, total, stem);
            tally.skipped += 1;
            continue;
        }

        let result = pdf_to_text(pdf_path).and_then(|text| {
            fs::write(&txt_path, text).with_context(|| format!("failed to write {}", txt_path.display()))
        });
        match result {
            Ok(()) => {
                println!("[{:>4}/{}] ok     {}.txt", i + 1, total, stem);
                tally.converted += 1;
            }
            Err(e) => {
                tracing::error!("Conversion of {:?} failed: {:#}", pdf_path, e);
                println!("[{:>4}/{}] failed {}  ({})", i + 1, total, pdf_path.display(), e);
                tally.failed += 1;
            }
        }
    }

    Ok(ConvertOutcome::Finished(tally))
}
