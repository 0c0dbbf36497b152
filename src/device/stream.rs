use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};

use crate::types::Frame;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

#[derive(Debug)]
struct TrackState {
    ended: AtomicBool,
}

impl TrackState {
    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn ready_state(&self) -> ReadyState {
        if self.ended.load(Ordering::SeqCst) {
            ReadyState::Ended
        } else {
            ReadyState::Live
        }
    }
}

/// Producer half of a video track. Pushing never blocks: a frame is
/// dropped when the consumer has not taken the previous one yet.
#[derive(Debug)]
pub struct TrackSender {
    tx: Sender<Frame>,
    state: Arc<TrackState>,
}

impl TrackSender {
    /// Returns false once the track has ended, either because it was
    /// stopped or because its consumer went away.
    pub fn push(&self, frame: Frame) -> bool {
        if self.is_ended() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => {
                self.state.end();
                false
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state.ready_state() == ReadyState::Ended
    }

    /// Ends the track from the producer side.
    pub fn end(&self) {
        self.state.end();
    }
}

/// Consumer half of a video track.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    label: String,
    rx: Receiver<Frame>,
    state: Arc<TrackState>,
}

/// Cheap observer used to poll a track's state without owning it.
#[derive(Clone, Debug)]
pub struct TrackHandle {
    state: Arc<TrackState>,
}

impl TrackHandle {
    pub fn ready_state(&self) -> ReadyState {
        self.state.ready_state()
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == ReadyState::Live
    }

    pub fn stop(&self) {
        self.state.end();
    }
}

pub fn video_track(label: impl Into<String>) -> (TrackSender, MediaTrack) {
    let (tx, rx) = bounded(1);
    let state = Arc::new(TrackState {
        ended: AtomicBool::new(false),
    });
    let id = format!("track-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed));
    (
        TrackSender {
            tx,
            state: state.clone(),
        },
        MediaTrack {
            id,
            label: label.into(),
            rx,
            state,
        },
    )
}

impl MediaTrack {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.ready_state()
    }

    pub fn stop(&self) {
        self.state.end();
    }

    pub fn handle(&self) -> TrackHandle {
        TrackHandle {
            state: self.state.clone(),
        }
    }

    /// Receiver of the raw frame feed, for consumers running on their own
    /// thread. Frames stop arriving once the track ends.
    pub fn frames(&self) -> Receiver<Frame> {
        self.rx.clone()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        if self.ready_state() == ReadyState::Ended {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.state.end();
                None
            }
        }
    }

    pub fn try_recv(&self) -> Option<Frame> {
        if self.ready_state() == ReadyState::Ended {
            return None;
        }
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.state.end();
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.first()
    }

    pub fn handles(&self) -> Vec<TrackHandle> {
        self.tracks.iter().map(MediaTrack::handle).collect()
    }

    pub fn is_active(&self) -> bool {
        self.tracks
            .iter()
            .any(|track| track.ready_state() == ReadyState::Live)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
