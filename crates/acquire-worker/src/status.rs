//! Status sink: progress notifications meant for the user.

use std::cell::RefCell;
use std::rc::Rc;

use crate::queue::ItemDesc;

pub trait AcquireStatus {
    /// The method started transferring `item`.
    fn fetch(&mut self, item: &ItemDesc);

    fn done(&mut self, item: &ItemDesc);

    /// The method found `item` unchanged since the last fetch.
    fn ims_hit(&mut self, item: &ItemDesc);

    fn fail(&mut self, item: &ItemDesc);

    /// Ask the user to insert `media` into `drive`. Returns `true` once the
    /// media is in place.
    fn media_change(&mut self, media: &str, drive: &str) -> bool {
        let _ = (media, drive);
        false
    }
}

pub type SharedStatus = Rc<RefCell<dyn AcquireStatus>>;
