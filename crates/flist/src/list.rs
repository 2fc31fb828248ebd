//! Segment-oriented file list.
//!
//! Entries are grouped into segments, each covering a dense, monotonically
//! allocated index range. A directory encountered in recursive mode is
//! recorded as a stub: its own entry is listed immediately, its children are
//! produced later as a fresh segment referenced on the wire by
//! `OFFSET - ordinal`. Indices are never reused; segments are retired only
//! from the front, once the receiver has confirmed them.

use std::collections::{BTreeMap, VecDeque};

use crate::entry::FileInfo;

/// A directory whose children have not been expanded yet.
#[derive(Clone, Debug)]
pub struct StubDirectory {
    ordinal: usize,
    index: i32,
    info: FileInfo,
}

impl StubDirectory {
    /// The directory's expansion ordinal, the value the wire reference
    /// `OFFSET - ordinal` is derived from.
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The directory entry's own global index.
    #[must_use]
    pub const fn index(&self) -> i32 {
        self.index
    }

    /// The directory entry.
    #[must_use]
    pub const fn info(&self) -> &FileInfo {
        &self.info
    }
}

/// Collects the entries of one segment before installation, preserving
/// insertion order.
#[derive(Debug, Default)]
pub struct SegmentBuilder {
    directory: Option<StubDirectory>,
    files: Vec<FileInfo>,
}

impl SegmentBuilder {
    /// Starts the initial segment, which has no parent directory.
    #[must_use]
    pub fn new() -> Self {
        Self { directory: None, files: Vec::new() }
    }

    /// Starts a segment holding the children of a previously listed stub.
    #[must_use]
    pub fn for_directory(stub: StubDirectory) -> Self {
        Self { directory: Some(stub), files: Vec::new() }
    }

    /// Appends one entry.
    pub fn add(&mut self, info: FileInfo) {
        self.files.push(info);
    }

    /// Appends a batch of entries in order.
    pub fn add_all(&mut self, files: Vec<FileInfo>) {
        self.files.extend(files);
    }

    /// Number of entries collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` when no entries have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One installed batch of file-list entries.
#[derive(Debug)]
pub struct Segment {
    directory: Option<StubDirectory>,
    begin: i32,
    end: i32,
    files: BTreeMap<i32, FileInfo>,
}

impl Segment {
    /// Global index of the segment's own directory entry, `None` for the
    /// initial segment.
    #[must_use]
    pub fn directory_index(&self) -> Option<i32> {
        self.directory.as_ref().map(StubDirectory::index)
    }

    /// The directory entry this segment expands, `None` for the initial
    /// segment.
    #[must_use]
    pub fn directory(&self) -> Option<&FileInfo> {
        self.directory.as_ref().map(StubDirectory::info)
    }

    /// First index of the segment's child range.
    #[must_use]
    pub const fn begin(&self) -> i32 {
        self.begin
    }

    /// One past the last index of the segment's child range.
    #[must_use]
    pub const fn end(&self) -> i32 {
        self.end
    }

    /// Reports whether `index` belongs to this segment, the directory's own
    /// entry included.
    #[must_use]
    pub fn contains(&self, index: i32) -> bool {
        (self.begin..self.end).contains(&index) || self.directory_index() == Some(index)
    }

    /// Looks up a live entry. The segment's own directory entry is visible
    /// through its index as well.
    #[must_use]
    pub fn get(&self, index: i32) -> Option<&FileInfo> {
        if self.directory_index() == Some(index) {
            return self.directory();
        }
        self.files.get(&index)
    }

    /// Removes a child entry once the receiver is done with it.
    pub fn remove(&mut self, index: i32) -> Option<FileInfo> {
        self.files.remove(&index)
    }

    /// Iterates the live children in index order, which is insertion order.
    pub fn files(&self) -> impl Iterator<Item = (i32, &FileInfo)> {
        self.files.iter().map(|(&index, info)| (index, info))
    }

    /// Number of live children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` when no live children remain.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.files.is_empty()
    }
}

/// The ordered collection of segments, allocator of wire indices.
#[derive(Debug)]
pub struct FileList {
    recursive: bool,
    segments: VecDeque<Segment>,
    stubs: BTreeMap<usize, StubDirectory>,
    next_index: i32,
    next_dir_ordinal: usize,
    num_files: u64,
    total_file_size: u64,
    segments_created: usize,
}

impl FileList {
    /// Sentinel index: end of one phase.
    pub const DONE: i32 = -1;
    /// Sentinel index: end of recursive expansion.
    pub const EOF: i32 = -2;
    /// Base for stub-directory references; a stub with ordinal `n` is
    /// referenced as `OFFSET - n`. More negative than any sentinel.
    pub const OFFSET: i32 = -101;

    /// Creates an empty list. In recursive mode, listed directories are
    /// queued as stubs for later expansion.
    #[must_use]
    pub fn new(recursive: bool) -> Self {
        Self {
            recursive,
            segments: VecDeque::new(),
            stubs: BTreeMap::new(),
            next_index: 0,
            next_dir_ordinal: 0,
            num_files: 0,
            total_file_size: 0,
            segments_created: 0,
        }
    }

    /// Installs the collected entries as the next segment and assigns their
    /// dense index range.
    pub fn new_segment(&mut self, builder: SegmentBuilder) -> &Segment {
        let SegmentBuilder { directory, files } = builder;
        let begin = self.next_index;

        let mut map = BTreeMap::new();
        for info in files {
            let index = self.next_index;
            self.next_index += 1;

            if info.attrs().is_regular_file() {
                self.total_file_size += info.attrs().size();
            }
            if self.recursive && info.attrs().is_directory() {
                let ordinal = self.next_dir_ordinal;
                self.next_dir_ordinal += 1;
                self.stubs.insert(
                    ordinal,
                    StubDirectory { ordinal, index, info: info.clone() },
                );
            }

            self.num_files += 1;
            map.insert(index, info);
        }

        self.segments.push_back(Segment {
            directory,
            begin,
            end: self.next_index,
            files: map,
        });
        self.segments_created += 1;
        self.segments.back().expect("segment was just installed")
    }

    /// Reports whether any stub directory awaits expansion.
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        !self.stubs.is_empty()
    }

    /// Removes and returns the stub with the given ordinal, if it is still
    /// pending.
    pub fn take_stub(&mut self, ordinal: usize) -> Option<StubDirectory> {
        self.stubs.remove(&ordinal)
    }

    /// Removes and returns the pending stub with the lowest ordinal, the
    /// next directory due for expansion.
    pub fn take_next_stub(&mut self) -> Option<StubDirectory> {
        self.stubs.pop_first().map(|(_, stub)| stub)
    }

    /// The front segment, if any.
    #[must_use]
    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments.front()
    }

    /// Retires the front segment after the receiver confirmed completion.
    pub fn delete_first_segment(&mut self) -> Option<Segment> {
        self.segments.pop_front()
    }

    /// Position of the segment containing `index`, if it is still live.
    #[must_use]
    pub fn segment_position_of(&self, index: i32) -> Option<usize> {
        self.segments.iter().position(|segment| segment.contains(index))
    }

    /// Mutable access to a segment by position.
    pub fn segment_at_mut(&mut self, position: usize) -> Option<&mut Segment> {
        self.segments.get_mut(position)
    }

    /// Looks up a live entry by global index across all segments.
    #[must_use]
    pub fn resolve(&self, index: i32) -> Option<&FileInfo> {
        self.segments.iter().find_map(|segment| segment.get(index))
    }

    /// Returns `true` when no segments remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments installed over the lifetime of the list.
    #[must_use]
    pub const fn expanded_segments(&self) -> usize {
        self.segments_created
    }

    /// Total number of entries ever listed.
    #[must_use]
    pub const fn num_files(&self) -> u64 {
        self.num_files
    }

    /// Sum of the sizes of all listed regular files.
    #[must_use]
    pub const fn total_file_size(&self) -> u64 {
        self.total_file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{FileAttributes, FileKind, User};
    use std::path::PathBuf;

    fn regular(name: &str, size: u64) -> FileInfo {
        FileInfo::new(
            PathBuf::from(format!("/src/{name}")),
            name.as_bytes().to_vec(),
            FileAttributes::new(FileKind::Regular, size, 1_700_000_000, 0o100_644, User::root()),
        )
    }

    fn directory(name: &str) -> FileInfo {
        FileInfo::new(
            PathBuf::from(format!("/src/{name}")),
            name.as_bytes().to_vec(),
            FileAttributes::new(FileKind::Directory, 0, 1_700_000_000, 0o040_755, User::root()),
        )
    }

    #[test]
    fn indices_are_dense_and_monotonic() {
        let mut list = FileList::new(false);
        let mut builder = SegmentBuilder::new();
        builder.add(regular("a", 1));
        builder.add(regular("b", 2));
        let segment = list.new_segment(builder);

        let indices: Vec<i32> = segment.files().map(|(index, _)| index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(segment.begin(), 0);
        assert_eq!(segment.end(), 2);
        assert_eq!(list.num_files(), 2);
        assert_eq!(list.total_file_size(), 3);
    }

    #[test]
    fn recursive_mode_stubs_directories_in_list_order() {
        let mut list = FileList::new(true);
        let mut builder = SegmentBuilder::new();
        builder.add(directory("."));
        builder.add(regular("a", 1));
        builder.add(directory("sub"));
        list.new_segment(builder);

        assert!(list.is_expandable());
        let first = list.take_stub(0).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.info().pathname_bytes(), b".");

        let second = list.take_stub(1).unwrap();
        assert_eq!(second.index(), 2);
        assert!(!list.is_expandable());
    }

    #[test]
    fn exact_mode_never_stubs() {
        let mut list = FileList::new(false);
        let mut builder = SegmentBuilder::new();
        builder.add(directory("sub"));
        list.new_segment(builder);
        assert!(!list.is_expandable());
    }

    #[test]
    fn child_segments_continue_the_index_space() {
        let mut list = FileList::new(true);
        let mut builder = SegmentBuilder::new();
        builder.add(directory("."));
        list.new_segment(builder);

        let stub = list.take_stub(0).unwrap();
        let mut child_builder = SegmentBuilder::for_directory(stub);
        child_builder.add(regular("a", 1));
        child_builder.add(regular("b", 2));
        let segment = list.new_segment(child_builder);

        assert_eq!(segment.begin(), 1);
        assert_eq!(segment.end(), 3);
        assert_eq!(segment.directory_index(), Some(0));
        // The directory's own entry stays visible through the child segment.
        assert_eq!(segment.get(0).unwrap().pathname_bytes(), b".");
    }

    #[test]
    fn removal_drives_is_finished() {
        let mut list = FileList::new(false);
        let mut builder = SegmentBuilder::new();
        builder.add(regular("a", 1));
        builder.add(regular("b", 2));
        list.new_segment(builder);

        let position = list.segment_position_of(0).unwrap();
        let segment = list.segment_at_mut(position).unwrap();
        assert!(!segment.is_finished());
        assert!(segment.remove(0).is_some());
        assert!(segment.remove(0).is_none());
        assert!(segment.remove(1).is_some());
        assert!(segment.is_finished());
    }

    #[test]
    fn resolve_finds_entries_across_segments() {
        let mut list = FileList::new(true);
        let mut builder = SegmentBuilder::new();
        builder.add(directory("."));
        list.new_segment(builder);

        let stub = list.take_stub(0).unwrap();
        let mut child_builder = SegmentBuilder::for_directory(stub);
        child_builder.add(regular("a", 4));
        list.new_segment(child_builder);

        assert_eq!(list.resolve(1).unwrap().pathname_bytes(), b"a");
        assert!(list.resolve(7).is_none());
        assert_eq!(list.expanded_segments(), 2);
    }

    #[test]
    fn front_retirement_preserves_later_segments() {
        let mut list = FileList::new(true);
        let mut builder = SegmentBuilder::new();
        builder.add(directory("."));
        list.new_segment(builder);
        let stub = list.take_stub(0).unwrap();
        let mut child_builder = SegmentBuilder::for_directory(stub);
        child_builder.add(regular("a", 4));
        list.new_segment(child_builder);

        let removed = list.delete_first_segment().unwrap();
        assert_eq!(removed.begin(), 0);
        assert!(!list.is_empty());
        assert_eq!(list.first_segment().unwrap().begin(), 1);
    }

    #[test]
    fn sentinels_are_distinct_and_negative() {
        assert!(FileList::DONE < 0);
        assert!(FileList::EOF < 0);
        assert!(FileList::OFFSET < FileList::EOF);
        assert_ne!(FileList::DONE, FileList::EOF);
    }
}
