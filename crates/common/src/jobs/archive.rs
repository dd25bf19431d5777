use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::Utc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::acl::{self, Permission, PrincipalId};
use crate::vfs::{FileContent, Node, NodeId, UploadOptions, Vfs, VfsError};

use super::JobOutput;

/// Name used for a folder inside and for its archive. Roots are named after
/// their owner, which is not something to put in a file name.
fn display_name(folder: &Node) -> &str {
    if folder.is_root() {
        "root"
    } else {
        folder.name()
    }
}

/// File name of the archive built for `folder`.
pub fn archive_name(folder: &Node) -> String {
    format!("{}.zip", display_name(folder))
}

enum Entry {
    Folder(String),
    File(String, FileContent),
}

fn check(cancel: &AtomicBool) -> Result<(), VfsError> {
    if cancel.load(Ordering::Acquire) {
        return Err(VfsError::Cancelled);
    }
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> VfsError {
    VfsError::Content(anyhow::Error::new(e).context("failed to write archive"))
}

/// Zip `folder` and store the archive next to it (inside it for a root).
///
/// Entries are prefixed with the folder's name; empty folders get explicit
/// directory entries. Nodes the actor cannot read are left out.
pub(crate) async fn build(
    vfs: &Vfs,
    actor: &PrincipalId,
    folder: &NodeId,
    cancel: &AtomicBool,
) -> Result<JobOutput, VfsError> {
    let tree = vfs.snapshot();
    let now = Utc::now();
    acl::require(&tree, actor, folder, Permission::Read, now)?;
    let folder_node = tree.node(folder)?;
    if !folder_node.is_folder() {
        return Err(VfsError::NotADirectory(folder.to_string()));
    }

    let mut names: HashMap<NodeId, String> = HashMap::new();
    let mut entries = Vec::new();
    for id in tree.descendants(folder) {
        let node = tree.node(&id)?;
        let name = match node.parent().and_then(|parent| names.get(parent)) {
            Some(parent_name) if id != *folder => format!("{}/{}", parent_name, node.name()),
            _ => display_name(folder_node).to_string(),
        };
        names.insert(id, name.clone());
        if !acl::effective_permission(&tree, actor, &id, now).allows(Permission::Read) {
            continue;
        }
        match node.content() {
            Some(content) => entries.push(Entry::File(name, content.clone())),
            None if !tree.has_children(&id) => entries.push(Entry::Folder(format!("{}/", name))),
            None => {}
        }
    }

    let mut files: Vec<(String, Bytes)> = Vec::new();
    let mut folders: Vec<String> = Vec::new();
    for entry in entries {
        check(cancel)?;
        match entry {
            Entry::Folder(name) => folders.push(name),
            Entry::File(name, content) => files.push((name, vfs.fetch(&content).await?)),
        }
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for name in &folders {
        zip.add_directory(name.as_str(), options).map_err(zip_error)?;
    }
    for (name, data) in &files {
        check(cancel)?;
        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        zip.write_all(data)
            .map_err(|e| VfsError::Content(anyhow::Error::new(e)))?;
    }
    let archive = zip.finish().map_err(zip_error)?.into_inner();
    check(cancel)?;

    let owner = folder_node.owner().clone();
    let target_dir = folder_node.parent().copied().unwrap_or(*folder);
    let path = tree.path_of(&target_dir)?.join(&archive_name(folder_node))?;
    drop(tree);

    let size = archive.len() as u64;
    let node = vfs
        .upload(
            actor,
            &owner,
            &path,
            Bytes::from(archive),
            UploadOptions::overwrite(),
        )
        .await?;

    tracing::info!(
        folder = %folder,
        archive = %node,
        entries = files.len() + folders.len(),
        size,
        "built folder archive"
    );

    Ok(JobOutput::Archive {
        node,
        entries: files.len() + folders.len(),
        size,
    })
}
