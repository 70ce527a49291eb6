//! Physical address to compiled block, as a two level table.
//!
//! The outer level has one entry per 4 KiB page and is filled lazily. A new page starts with
//! every slot on `Slot::CompileStub`, so an absent page and an uncompiled word are both
//! simply "compile first". Each page carries a code mask with one bit per word that some
//! block was built from; a write only costs a bit test unless it lands on translated code.

use std::collections::HashMap;

use tracing::debug;

use crate::builder::SysConfig;
use crate::cache::CodeRange;
use crate::{BLOCKCACHE_INNER_SIZE, BLOCKCACHE_OUTER_SHIFT, BLOCKCACHE_OUTER_SIZE};

/// A compiled unit and what it was compiled under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationBlock {
    pub code: CodeRange,
    /// Virtual address the unit was formed at. Link addresses and branch targets depend on it.
    pub start_pc: u64,
    /// Guest instructions in the unit
    pub len: u32,
    pub sysconfig: SysConfig,
    pub idle_loop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    CompileStub,
    Block(TranslationBlock),
}

const MASK_WORDS: usize = BLOCKCACHE_INNER_SIZE / 64;

struct Page {
    slots: Box<[Slot]>,
    code_mask: [u64; MASK_WORDS],
}

impl Page {
    fn new() -> Box<Page> {
        Box::new(Page { slots: vec![Slot::CompileStub; BLOCKCACHE_INNER_SIZE].into_boxed_slice(), code_mask: [0; MASK_WORDS] })
    }

    fn mark(&mut self, word: usize) {
        self.code_mask[word / 64] |= 1 << (word % 64);
    }

    fn is_code(&self, word: usize) -> bool {
        self.code_mask[word / 64] & (1 << (word % 64)) != 0
    }
}

fn split(phys: u32) -> (usize, usize) {
    let page = (phys >> BLOCKCACHE_OUTER_SHIFT) as usize;
    let word = ((phys >> 2) as usize) & (BLOCKCACHE_INNER_SIZE - 1);
    (page, word)
}

pub struct Directory {
    pages: Vec<Option<Box<Page>>>,
    /// Pages whose blocks pulled a delay slot from the key page
    dependents: HashMap<usize, Vec<usize>>,
    resident: usize,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Directory {
        let mut pages = Vec::new();
        pages.resize_with(BLOCKCACHE_OUTER_SIZE, || None);
        Directory { pages, dependents: HashMap::new(), resident: 0 }
    }

    /// `None` when the page was never compiled into (or was dropped since)
    pub fn slot(&self, phys: u32) -> Option<&Slot> {
        let (page, word) = split(phys);
        self.pages[page].as_ref().map(|p| &p.slots[word])
    }

    pub fn get(&self, phys: u32) -> Option<TranslationBlock> {
        match self.slot(phys)? {
            Slot::Block(block) => Some(*block),
            Slot::CompileStub => None,
        }
    }

    pub fn is_page_resident(&self, phys: u32) -> bool {
        self.pages[split(phys).0].is_some()
    }

    /// Pages currently allocated
    pub fn resident_pages(&self) -> usize {
        self.resident
    }

    fn page_mut(&mut self, page: usize) -> &mut Page {
        let resident = &mut self.resident;
        self.pages[page].get_or_insert_with(|| {
            *resident += 1;
            Page::new()
        })
    }

    /// Install a block at `phys`, marking every word it was built from as code
    pub fn insert(&mut self, phys: u32, block: TranslationBlock, words: &[u32]) {
        let (home, word) = split(phys);
        self.page_mut(home).slots[word] = Slot::Block(block);
        for &addr in words {
            let (page, word) = split(addr);
            self.page_mut(page).mark(word);
            if page != home {
                let deps = self.dependents.entry(page).or_default();
                if !deps.contains(&home) {
                    deps.push(home);
                }
            }
        }
    }

    /// Does `phys` hold a word some resident block was compiled from
    pub fn is_code(&self, phys: u32) -> bool {
        let (page, word) = split(phys);
        self.pages[page].as_ref().is_some_and(|p| p.is_code(word))
    }

    /// A write to `phys` happened. Returns whether any compiled code was dropped.
    pub fn invalidate(&mut self, phys: u32) -> bool {
        if !self.is_code(phys) {
            return false;
        }
        let (page, _) = split(phys);
        debug!(target: "JIT", "write to {:#010x} invalidates page {:#x}", phys, page);
        self.drop_page(page);
        true
    }

    /// Drop `page` and, transitively, every page with a block that pulled a word from a
    /// dropped page. The pulled word's code mask bit lives in the dropped page, so those blocks
    /// could no longer be invalidated.
    fn drop_page(&mut self, page: usize) {
        let mut pending = vec![page];
        while let Some(page) = pending.pop() {
            if self.pages[page].take().is_some() {
                self.resident -= 1;
            }
            if let Some(homes) = self.dependents.remove(&page) {
                pending.extend(homes);
            }
            // Its own pulls are gone with it
            self.dependents.retain(|_, homes| {
                homes.retain(|&home| home != page);
                !homes.is_empty()
            });
        }
    }

    /// Pages that some other page's blocks pulled a word from
    pub fn linked_pages(&self) -> usize {
        self.dependents.len()
    }

    pub fn clear(&mut self) {
        for page in &mut self.pages {
            *page = None;
        }
        self.dependents.clear();
        self.resident = 0;
    }
}
