use dcp_forge::frame::{Eyes, FrameOrigin};
use dcp_forge::player::Player;
use dcp_forge::playlist::{Content, ContentSource, Playlist};
use dcp_forge::source::MediaSource;
use dcp_forge::time::DcpTime;

fn pattern() -> ContentSource {
    ContentSource::TestPattern { color: [90, 90, 90] }
}

fn shown(player: &Player, index: u64) -> (String, i64) {
    match player.origin(index) {
        FrameOrigin::Content { id, frame } => (id, frame),
        FrameOrigin::Black => ("black".into(), -1),
    }
}

fn mixed_rates() -> Playlist {
    let mut playlist = Playlist::new(24);
    playlist.set_sequence(true);
    playlist.add(Content::new("film", pattern(), 24.0, 48)).unwrap();
    playlist.add(Content::new("pal", pattern(), 25.0, 50)).unwrap();
    playlist.add(Content::new("hfr", pattern(), 48.0, 20)).unwrap();
    playlist
}

#[test]
fn content_switches_exactly_at_frame_boundaries() {
    let playlist = mixed_rates();
    assert_eq!(playlist.length_frames(), 48 + 50 + 10);
    let player = Player::new(playlist, 16, 8, false);

    assert_eq!(shown(&player, 47), ("film".into(), 47));
    assert_eq!(shown(&player, 48), ("pal".into(), 0));
    assert_eq!(shown(&player, 72), ("pal".into(), 24));
    assert_eq!(shown(&player, 97), ("pal".into(), 49));
    assert_eq!(shown(&player, 98), ("hfr".into(), 0));
    assert_eq!(shown(&player, 107), ("hfr".into(), 18));
}

#[test]
fn rate_change_follows_the_visible_content() {
    let playlist = mixed_rates();
    let pal_start = playlist.frame_time(48);
    assert_eq!(
        playlist.active_frame_rate_change(pal_start - DcpTime::new(1)).source,
        24.0
    );
    let frc = playlist.active_frame_rate_change(pal_start);
    assert!(frc.change_speed);
    assert!(playlist.active_frame_rate_change(playlist.frame_time(100)).skip);

    let (slowest, fastest) = playlist.speed_up_range();
    assert!((slowest - 0.96).abs() < 1e-9);
    assert!((fastest - 1.0).abs() < 1e-9);
}

#[test]
fn edits_rederive_timing() {
    let mut playlist = mixed_rates();
    let before = playlist.video_identifier();
    playlist.remove("pal").unwrap();
    assert_eq!(playlist.length_frames(), 58);
    assert_eq!(playlist.content()[1].position, DcpTime::from_frames(48, 24.0));
    assert_ne!(playlist.video_identifier(), before);

    playlist.move_earlier("hfr").unwrap();
    let order: Vec<_> = playlist.content().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(order, vec!["hfr", "film"]);
    assert_eq!(playlist.content()[1].position, DcpTime::from_frames(10, 24.0));
}

#[test]
fn player_snapshots_do_not_see_later_edits() {
    let mut playlist = mixed_rates();
    let mut player = Player::new(playlist.clone(), 16, 8, true);
    playlist.remove("film").unwrap();

    let mut source = MediaSource::new(16, 8);
    let frame = player.frame(&mut source, 10, Eyes::Right).unwrap();
    assert_eq!(
        frame.origin,
        Some(FrameOrigin::Content {
            id: "film".into(),
            frame: 10
        })
    );
    assert_eq!(player.length_frames(), 108);
    assert_eq!(player.eyes(), &[Eyes::Left, Eyes::Right]);
}
