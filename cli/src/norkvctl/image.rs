// cli/src/norkvctl/image.rs — file-backed flash images: load, save,
// format. An image is the raw little-endian byte dump of the region.

use std::path::Path;

use norkv::config::{PAGE_COUNT, PAGE_SIZE};
use norkv::{SimFlash, Store};

use super::CtlError;

pub fn load(path: &Path) -> Result<SimFlash, CtlError> {
    Ok(SimFlash::from_image_file(path)?)
}

pub fn save(flash: &SimFlash, path: &Path) -> Result<(), CtlError> {
    Ok(flash.save_image_file(path)?)
}

/// Mount an image; repairs happen on the in-memory copy only, callers
/// decide whether to persist them with [`commit`].
pub fn mount(path: &Path) -> Result<Store<SimFlash>, CtlError> {
    Ok(Store::mount(load(path)?)?)
}

/// Write the mounted store's flash back to the image file.
pub fn commit(store: Store<SimFlash>, path: &Path) -> Result<(), CtlError> {
    save(&store.unmount(), path)
}

pub fn format(path: &Path) -> Result<(), CtlError> {
    save(&SimFlash::new(), path)?;
    println!(
        "formatted {} ({} pages x {} bytes)",
        path.display(),
        PAGE_COUNT,
        PAGE_SIZE
    );
    Ok(())
}
