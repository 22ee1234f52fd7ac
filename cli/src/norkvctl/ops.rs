// cli/src/norkvctl/ops.rs — record-level subcommands: write, read,
// delete, stats, clean. Mutations mount, apply, and persist the image.

use std::path::Path;

use serde_json::json;
use tracing::debug;

use super::{image, CtlError};

fn payload_from(data: Option<String>, text: Option<String>) -> Result<Vec<u8>, CtlError> {
    match (data, text) {
        (Some(hexstr), None) => {
            hex::decode(hexstr.trim()).map_err(|e| CtlError::Arg(format!("--data: {e}")))
        }
        (None, Some(s)) => Ok(s.into_bytes()),
        (None, None) => Ok(Vec::new()),
        (Some(_), Some(_)) => unreachable!("clap rejects the combination"),
    }
}

pub fn write(
    path: &Path,
    id: u16,
    data: Option<String>,
    text: Option<String>,
) -> Result<(), CtlError> {
    let payload = payload_from(data, text)?;
    debug!(id, len = payload.len(), "write");
    let mut store = image::mount(path)?;
    store.write(id, &payload)?;
    image::commit(store, path)?;
    println!("wrote id {} ({} bytes)", id, payload.len());
    Ok(())
}

pub fn read(path: &Path, id: u16, json: bool) -> Result<(), CtlError> {
    let mut store = image::mount(path)?;
    let len = store.read_len(id)?;
    let mut buf = vec![0u8; len];
    store.read(id, &mut buf)?;
    if json {
        println!(
            "{}",
            json!({ "id": id, "length": len, "data": hex::encode(&buf) })
        );
    } else {
        match std::str::from_utf8(&buf) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => {
                println!("id {} ({} bytes): {}", id, len, s)
            }
            _ => println!("id {} ({} bytes): {}", id, len, hex::encode(&buf)),
        }
    }
    Ok(())
}

pub fn delete(path: &Path, id: u16) -> Result<(), CtlError> {
    let mut store = image::mount(path)?;
    let existed = store.contains(id);
    store.delete(id)?;
    image::commit(store, path)?;
    if existed {
        println!("deleted id {}", id);
    } else {
        println!("id {} was not bound", id);
    }
    Ok(())
}

pub fn stats(path: &Path, json: bool) -> Result<(), CtlError> {
    let store = image::mount(path)?;
    let stats = store.stats();
    if json {
        println!(
            "{}",
            json!({
                "busy_pages": stats.busy_pages,
                "free_pages": stats.free_pages,
                "ids": stats.ids,
                "next_alloc": stats.next_alloc,
            })
        );
    } else {
        println!("busy pages : {}", stats.busy_pages);
        println!("free pages : {}", stats.free_pages);
        println!("bound ids  : {}", stats.ids);
        match stats.next_alloc {
            Some(phys) => println!("next alloc : page {}", phys),
            None => println!("next alloc : none (flash full)"),
        }
    }
    Ok(())
}

pub fn clean(path: &Path) -> Result<(), CtlError> {
    let mut store = image::mount(path)?;
    store.clean()?;
    image::commit(store, path)?;
    println!("cleaned {}", path.display());
    Ok(())
}
