//! OPC part-name arithmetic: relationship part locations and target resolution.

pub fn rels_for_part(part: &str) -> String {
    let part = part.strip_prefix('/').unwrap_or(part);
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// The part a relationship part belongs to, or `None` for names outside a `_rels/` folder.
///
/// The package-level `_rels/.rels` maps to the empty source part (the package root).
pub fn source_part_for_rels(rels_part: &str) -> Option<String> {
    let rels_part = rels_part.strip_prefix('/').unwrap_or(rels_part);
    let (dir, file_name) = match rels_part.rsplit_once('/') {
        Some(split) => split,
        None => return None,
    };
    let source_file = file_name.strip_suffix(".rels")?;
    let source_dir = if dir == "_rels" {
        ""
    } else {
        dir.strip_suffix("/_rels")?
    };
    Some(if source_dir.is_empty() {
        source_file.to_string()
    } else {
        format!("{source_dir}/{source_file}")
    })
}

pub fn resolve_target(source_part: &str, target: &str) -> String {
    // Relationship targets are URIs; some producers include a fragment (e.g. `../media/img.png#id`).
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }

    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// Last path segment of a part name.
pub fn file_name(part: &str) -> &str {
    part.rsplit_once(['/', '\\']).map(|(_, name)| name).unwrap_or(part)
}

/// Split a file name into stem and lowercase extension (without the dot).
pub fn split_extension(file_name: &str) -> (&str, String) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_ascii_lowercase()),
        _ => (file_name, String::new()),
    }
}
