// cli/src/norkvctl/inspect.rs — page table and id dump. Works in two
// layers: the raw header view of the image as it sits on disk, then the
// logical view after an in-memory mount (the image file is not rewritten,
// so crash states can be examined safely).

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use norkv::config::*;
use norkv::layout;
use norkv::{SimFlash, Store};

use super::{image, CtlError};

#[derive(Serialize)]
struct HeaderRow {
    phys: usize,
    status: &'static str,
    virt: u16,
}

#[derive(Serialize)]
struct PageRow {
    virt: u16,
    phys: u16,
    live: u32,
    fragments: u32,
    free_space: u32,
}

#[derive(Serialize)]
struct IdRow {
    id: u16,
    length: usize,
}

#[derive(Serialize)]
struct Report {
    page_size: usize,
    page_count: usize,
    headers: Vec<HeaderRow>,
    pages: Vec<PageRow>,
    ids: Vec<IdRow>,
    mount_error: Option<String>,
}

fn status_name(status: u16) -> &'static str {
    match status {
        STATUS_ERASED => "ERASED",
        STATUS_RECEIVING => "RECEIVING",
        STATUS_VALID => "VALID",
        _ => "UNKNOWN",
    }
}

fn colored_status(status: u16) -> colored::ColoredString {
    match status {
        STATUS_ERASED => "ERASED".dimmed(),
        STATUS_RECEIVING => "RECEIVING".yellow(),
        STATUS_VALID => "VALID".green(),
        _ => "UNKNOWN".red(),
    }
}

fn headers(raw: &SimFlash) -> Vec<HeaderRow> {
    (0..PAGE_COUNT)
        .filter(|&phys| layout::page_status(raw, phys) != STATUS_ERASED)
        .map(|phys| HeaderRow {
            phys,
            status: status_name(layout::page_status(raw, phys)),
            virt: layout::page_virt(raw, phys),
        })
        .collect()
}

fn logical_view(raw: SimFlash) -> (Vec<PageRow>, Vec<IdRow>, Option<String>) {
    match Store::mount(raw) {
        Ok(store) => {
            let pages = store
                .pages()
                .map(|p| PageRow {
                    virt: p.virt,
                    phys: p.phys,
                    live: p.live,
                    fragments: p.fragments,
                    free_space: p.free_space,
                })
                .collect();
            let ids = store
                .ids()
                .collect::<Vec<_>>()
                .into_iter()
                .map(|id| IdRow {
                    id,
                    length: store.read_len(id).unwrap_or(0),
                })
                .collect();
            (pages, ids, None)
        }
        Err(e) => (Vec::new(), Vec::new(), Some(e.to_string())),
    }
}

pub fn run(path: &Path, json: bool) -> Result<(), CtlError> {
    let raw = image::load(path)?;
    let header_rows = headers(&raw);

    if json {
        let (pages, ids, mount_error) = logical_view(raw);
        let report = Report {
            page_size: PAGE_SIZE,
            page_count: PAGE_COUNT,
            headers: header_rows,
            pages,
            ids,
            mount_error,
        };
        println!("{}", serde_json::to_string(&report).expect("report serializes"));
        return Ok(());
    }

    println!("geometry: {} pages x {} bytes", PAGE_COUNT, PAGE_SIZE);
    println!("-- raw headers (non-erased) --");
    if header_rows.is_empty() {
        println!("  (blank flash)");
    }
    for row in &header_rows {
        let status = layout::page_status(&raw, row.phys);
        println!(
            "  page {:>3}  {:<9}  virt {}",
            row.phys,
            colored_status(status),
            row.virt
        );
    }

    let (pages, ids, mount_error) = logical_view(raw);
    match mount_error {
        Some(e) => println!("-- mount failed: {} --", e),
        None => {
            println!("-- mounted view --");
            for p in &pages {
                println!(
                    "  virt {:>5}  page {:>3}  live {:>4}  fragments {:>4}  free {:>4}",
                    p.virt, p.phys, p.live, p.fragments, p.free_space
                );
            }
            if ids.is_empty() {
                println!("  no bound ids");
            } else {
                for row in &ids {
                    println!("  id {:>5}  {} bytes", row.id, row.length);
                }
            }
        }
    }
    Ok(())
}
