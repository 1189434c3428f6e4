use chromafe::history::DEFAULT_MAX_DEPTH;
use chromafe::{ColorSpace, HistoryStore, ImageBuffer, Operator};

fn img(v: u8) -> ImageBuffer {
    ImageBuffer::filled(3, 2, ColorSpace::Bgr, v)
}

fn first_samples(h: &HistoryStore) -> Vec<u8> {
    h.entries().map(|e| e.image.samples()[0]).collect()
}

#[test]
fn commit_after_undo_discards_redo_branch() {
    let mut h = HistoryStore::new(img(b'A'), DEFAULT_MAX_DEPTH);
    h.commit(img(b'B'), None);
    h.commit(img(b'C'), None);
    assert!(h.undo().is_some());
    assert!(h.undo().is_some());
    h.commit(img(b'D'), Some(Operator::Sharpen));
    assert_eq!(first_samples(&h), vec![b'A', b'D']);
    assert_eq!(h.current().image, img(b'D'));
    assert!(h.can_undo());
    assert!(!h.can_redo());
}

#[test]
fn can_undo_and_can_redo_track_cursor() {
    let mut h = HistoryStore::new(img(0), DEFAULT_MAX_DEPTH);
    let n = 5;
    for v in 1..=n {
        h.commit(img(v), None);
        assert!(h.can_undo());
        assert!(!h.can_redo());
    }
    for _ in 0..n {
        assert!(h.can_undo());
        h.undo();
    }
    assert!(!h.can_undo());
    assert!(h.can_redo());
    assert!(h.undo().is_none());

    h.redo();
    assert!(h.can_undo());
    assert_eq!(h.current().image, img(1));
}

#[test]
fn depth_bound_of_twenty_evicts_oldest() {
    let mut h = HistoryStore::new(img(0), 20);
    for v in 1..=21 {
        h.commit(img(v), None);
    }
    assert_eq!(h.len(), 20);
    assert_eq!(h.current().image, img(21));

    let mut steps = 0;
    while h.undo().is_some() {
        steps += 1;
    }
    assert_eq!(steps, 19);
    // Entries 0 and 1 were evicted.
    assert_eq!(h.current().image, img(2));
}

#[test]
fn reset_makes_a_single_entry() {
    let mut h = HistoryStore::new(img(0), 4);
    h.commit(img(1), None);
    h.undo();
    h.reset(img(9));
    assert_eq!(h.len(), 1);
    assert_eq!(h.cursor(), 0);
    assert!(!h.can_undo() && !h.can_redo());
    assert_eq!(h.current().image, img(9));
}
