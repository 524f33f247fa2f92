use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn render_html(title: &str, figure: &Value) -> String {
    // Keep a literal "</script>" inside the JSON from closing the tag.
    let figure = figure.to_string().replace("</", "<\\/");
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="ko">
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{PLOTLY_CDN}"></script>
</head>
<body style="margin:0">
<h3 style="text-align:center;color:black">{title}</h3>
<div id="figure" style="width:100%;height:85vh"></div>
<script>
const figure = {figure};
Plotly.newPlot("figure", figure.data, figure.layout, {{responsive: true}});
</script>
</body>
</html>
"#
    )
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create export directory: {:?}", parent))?;
    }
    Ok(())
}

pub fn write_html(path: &Path, title: &str, figure: &Value) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, render_html(title, figure))
        .with_context(|| format!("Failed to write export: {:?}", path))
}

/// Writes the export only when `path` does not exist yet. Returns whether it wrote.
pub fn write_if_absent(path: &Path, title: &str, figure: &Value) -> Result<bool> {
    ensure_parent(path)?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to create export: {:?}", path)),
    };
    file.write_all(render_html(title, figure).as_bytes())
        .with_context(|| format!("Failed to write export: {:?}", path))?;
    Ok(true)
}
