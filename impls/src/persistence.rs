//! Atomic, crash-safe persistence for project state to a local directory
//! (spec §4.4). Every write goes to a sibling `.tmp` path and is renamed into
//! place; a reader never observes a partially written file.
//!
//! All functions here are synchronous and perform blocking filesystem I/O;
//! [`crate::file_hub::FileBackedHub`] runs them inside `spawn_blocking`.

use api::types::{sanitize_project_id, ProjectDocument};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

fn aggregate_path(data_dir: &Path, project: &str) -> PathBuf {
	data_dir.join(format!("{project}.json"))
}

fn project_dir(data_dir: &Path, project: &str) -> PathBuf {
	data_dir.join(project)
}

fn glyphs_dir(data_dir: &Path, project: &str) -> PathBuf {
	project_dir(data_dir, project).join("glyphs")
}

fn syntaxes_dir(data_dir: &Path, project: &str) -> PathBuf {
	project_dir(data_dir, project).join("syntaxes")
}

fn metrics_path(data_dir: &Path, project: &str) -> PathBuf {
	project_dir(data_dir, project).join("metrics.json")
}

#[cfg(unix)]
fn create_dir_all_mode(path: &Path, mode: u32) -> io::Result<()> {
	std::fs::create_dir_all(path)?;
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn create_dir_all_mode(path: &Path, _mode: u32) -> io::Result<()> {
	std::fs::create_dir_all(path)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> io::Result<()> {
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> io::Result<()> {
	Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
	let mut os = path.as_os_str().to_owned();
	os.push(".tmp");
	PathBuf::from(os)
}

/// Writes `bytes` to `path` by first writing a sibling `.tmp` file and then
/// renaming it into place, so a crash mid-write never leaves `path` corrupt.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
	let tmp = sibling_tmp_path(path);
	std::fs::write(&tmp, bytes)?;
	set_file_mode(&tmp, FILE_MODE)?;
	std::fs::rename(&tmp, path)
}

fn sanitize_filename_component(raw: &str) -> String {
	raw.chars()
		.map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
		.collect::<String>()
		.trim()
		.to_string()
}

fn derive_base_filename(id: &str, value: &Value) -> String {
	let by_name = value.get("name").and_then(Value::as_str).map(sanitize_filename_component);
	if let Some(name) = by_name {
		if !name.is_empty() {
			return name;
		}
	}
	let by_id = sanitize_filename_component(id);
	if !by_id.is_empty() {
		return by_id;
	}
	"unnamed".to_string()
}

/// Assigns a stable, collision-free `<id> -> filename` mapping for one
/// entity map, preferring the entity's `name` field and falling back to its
/// id, then to `"unnamed"`, suffixing on collision.
fn assign_filenames(entities: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
	let mut used = HashSet::new();
	let mut result = BTreeMap::new();
	for (id, value) in entities {
		let base = derive_base_filename(id, value);
		let mut candidate = format!("{base}.json");
		if used.contains(&candidate) {
			let sanitized_id = sanitize_filename_component(id);
			candidate = format!("{base}--{sanitized_id}.json");
			let mut suffix = 2;
			while used.contains(&candidate) {
				candidate = format!("{base}--{sanitized_id}-{suffix}.json");
				suffix += 1;
			}
		}
		used.insert(candidate.clone());
		result.insert(id.clone(), candidate);
	}
	result
}

fn write_entity_files(dir: &Path, entities: &BTreeMap<String, Value>) -> io::Result<()> {
	create_dir_all_mode(dir, DIR_MODE)?;
	let filenames = assign_filenames(entities);

	for (id, filename) in &filenames {
		let bytes = serde_json::to_vec_pretty(&entities[id])
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		write_atomic(&dir.join(filename), &bytes)?;
	}

	let expected: HashSet<&String> = filenames.values().collect();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let name = name.to_string_lossy();
		if name.ends_with(".json") && !expected.iter().any(|f| f.as_str() == name) {
			std::fs::remove_file(entry.path())?;
		}
	}
	Ok(())
}

/// Persists a full project document: the aggregate file, the per-entity
/// stale-cleaned glyph/syntax directories, and the metrics singleton.
pub(crate) fn persist_project(data_dir: &Path, doc: &ProjectDocument) -> io::Result<()> {
	create_dir_all_mode(data_dir, DIR_MODE)?;

	let aggregate_bytes = serde_json::to_vec_pretty(doc)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	write_atomic(&aggregate_path(data_dir, &doc.project), &aggregate_bytes)?;

	let glyphs: BTreeMap<String, Value> =
		doc.glyphs.iter().filter_map(|v| Some((v.get("id")?.as_str()?.to_string(), v.clone()))).collect();
	let syntaxes: BTreeMap<String, Value> =
		doc.syntaxes.iter().filter_map(|v| Some((v.get("id")?.as_str()?.to_string(), v.clone()))).collect();

	write_entity_files(&glyphs_dir(data_dir, &doc.project), &glyphs)?;
	write_entity_files(&syntaxes_dir(data_dir, &doc.project), &syntaxes)?;

	create_dir_all_mode(&project_dir(data_dir, &doc.project), DIR_MODE)?;
	let metrics_bytes = serde_json::to_vec_pretty(&doc.metrics)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	write_atomic(&metrics_path(data_dir, &doc.project), &metrics_bytes)?;

	Ok(())
}

/// Loads the aggregate document for `project` from `data_dir`, if present.
/// Understands both the modern shape (`project`/`version` present) and the
/// legacy flat format (only `glyphs`/`syntaxes`/`metrics`), wrapping the
/// latter with `version = 1` and a fresh timestamp.
pub(crate) fn load_aggregate(data_dir: &Path, project: &str) -> io::Result<Option<ProjectDocument>> {
	let path = aggregate_path(data_dir, project);
	let bytes = match std::fs::read(&path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e),
	};

	let raw: Value =
		serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

	if raw.get("project").is_some() && raw.get("version").is_some() {
		let doc: ProjectDocument =
			serde_json::from_value(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		return Ok(Some(doc));
	}

	Ok(Some(wrap_legacy_document(raw, project)))
}

fn wrap_legacy_document(raw: Value, project: &str) -> ProjectDocument {
	let glyphs = raw.get("glyphs").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
	let syntaxes = raw.get("syntaxes").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
	let metrics = raw.get("metrics").cloned().unwrap_or_else(|| Value::Object(Default::default()));

	let glyphs: Vec<Value> = glyphs.as_array().cloned().unwrap_or_default();
	let syntaxes: Vec<Value> = syntaxes.as_array().cloned().unwrap_or_default();

	let glyph_versions =
		glyphs.iter().filter_map(|v| Some((v.get("id")?.as_str()?.to_string(), 1))).collect();
	let syntax_versions =
		syntaxes.iter().filter_map(|v| Some((v.get("id")?.as_str()?.to_string(), 1))).collect();
	let metrics_version = if metrics.as_object().map(|m| m.is_empty()).unwrap_or(true) { 0 } else { 1 };

	ProjectDocument {
		project: sanitize_project_id(project),
		version: 1,
		updated_at: super::now_rfc3339(),
		glyphs,
		glyph_versions,
		syntaxes,
		syntax_versions,
		metrics,
		metrics_version,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn sample_doc(project: &str) -> ProjectDocument {
		ProjectDocument {
			project: project.to_string(),
			version: 3,
			updated_at: "2026-01-01T00:00:00.000000000Z".to_string(),
			glyphs: vec![json!({"id": "a", "name": "A"}), json!({"id": "b", "name": "A"})],
			glyph_versions: BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]),
			syntaxes: vec![],
			syntax_versions: BTreeMap::new(),
			metrics: json!({"unitsPerEm": 1000}),
			metrics_version: 1,
		}
	}

	#[test]
	fn persist_then_load_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let doc = sample_doc("proj");
		persist_project(dir.path(), &doc).unwrap();

		let loaded = load_aggregate(dir.path(), "proj").unwrap().unwrap();
		assert_eq!(loaded.version, 3);
		assert_eq!(loaded.glyphs.len(), 2);
		assert_eq!(loaded.glyph_versions["b"], 2);
	}

	#[test]
	fn load_missing_project_is_none() {
		let dir = tempfile::tempdir().unwrap();
		assert!(load_aggregate(dir.path(), "never-created").unwrap().is_none());
	}

	#[test]
	fn name_collisions_get_id_suffixed_filenames() {
		let dir = tempfile::tempdir().unwrap();
		let doc = sample_doc("proj");
		persist_project(dir.path(), &doc).unwrap();

		let glyphs_dir = glyphs_dir(dir.path(), "proj");
		let mut names: Vec<String> = std::fs::read_dir(&glyphs_dir)
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
			.collect();
		names.sort();
		assert_eq!(names, vec!["A--b.json".to_string(), "A.json".to_string()]);
	}

	#[test]
	fn stale_entity_files_are_cleaned_up_on_rewrite() {
		let dir = tempfile::tempdir().unwrap();
		let mut doc = sample_doc("proj");
		persist_project(dir.path(), &doc).unwrap();

		doc.glyphs.retain(|v| v["id"] != "b");
		doc.glyph_versions.remove("b");
		persist_project(dir.path(), &doc).unwrap();

		let glyphs_dir = glyphs_dir(dir.path(), "proj");
		let names: Vec<String> = std::fs::read_dir(&glyphs_dir)
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
			.collect();
		assert_eq!(names, vec!["A.json".to_string()]);
	}

	#[test]
	fn legacy_flat_format_loads_as_version_one() {
		let dir = tempfile::tempdir().unwrap();
		let path = aggregate_path(dir.path(), "legacy");
		std::fs::write(&path, serde_json::to_vec(&json!({
			"glyphs": [{"id": "a", "name": "A"}],
			"syntaxes": [],
			"metrics": {"unitsPerEm": 2000},
		})).unwrap()).unwrap();

		let doc = load_aggregate(dir.path(), "legacy").unwrap().unwrap();
		assert_eq!(doc.version, 1);
		assert_eq!(doc.glyph_versions["a"], 1);
		assert_eq!(doc.metrics_version, 1);
	}
}
