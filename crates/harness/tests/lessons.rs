use std::collections::BTreeSet;

use lessonsync_core::{LessonNumber, Partition};
use lessonsync_harness::{activity, lesson, standard_lesson, TestSession};

fn n(v: u32) -> LessonNumber {
    LessonNumber::new(v).unwrap()
}

// ============================================================================
// Numbering
// ============================================================================

#[tokio::test]
async fn list_numbers_is_numeric_not_lexicographic() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    for v in [10, 2, 1, 21, 3] {
        s.engine
            .lessons_mut()
            .upsert(&s.partition, n(v), standard_lesson(&v.to_string(), "Core Songs"))?;
    }
    assert_eq!(s.numbers(), vec![1, 2, 3, 10, 21]);
    Ok(())
}

#[tokio::test]
async fn numbers_survive_a_restart_in_numeric_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::offline().await?;
    for v in [9, 10, 11] {
        s.engine
            .lessons_mut()
            .upsert(&s.partition, n(v), standard_lesson(&v.to_string(), "Core Songs"))?;
    }
    let reopened = s.reopen("LKG", "2024-2025").await?;
    assert_eq!(reopened.numbers(), vec![9, 10, 11]);
    Ok(())
}

#[tokio::test]
async fn create_lesson_takes_the_next_number() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    s.engine
        .lessons_mut()
        .upsert(&s.partition, n(9), standard_lesson("9", "Core Songs"))?;
    let created = s
        .engine
        .create_lesson(&s.partition, standard_lesson("x", "Scarf Songs"), None)?;
    assert_eq!(created, n(10));
    Ok(())
}

// ============================================================================
// Derived fields
// ============================================================================

#[tokio::test]
async fn derived_fields_track_every_edit() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    s.engine.lessons_mut().upsert(
        &p,
        n(1),
        lesson("l1", &[("Goodbye", 3), ("Parachute Games", 12), ("Welcome", 4), ("Art", 6)]),
    )?;
    s.engine
        .assign_activity(&p, n(1), activity("extra", "Parachute Games", 5), None)?;
    s.engine
        .lessons_mut()
        .remove_activity(&p, n(1), &"l1-3".into())?;

    let lesson = s.lesson(1).unwrap();
    let sum: u32 = lesson.activities().map(|a| a.time).sum();
    assert_eq!(lesson.total_time, sum);
    assert_eq!(lesson.total_time, 24);

    let order: BTreeSet<&String> = lesson.category_order.iter().collect();
    let keys: BTreeSet<&String> = lesson.grouped.keys().collect();
    assert_eq!(order, keys);
    assert_eq!(lesson.category_order, vec!["Welcome", "Parachute Games", "Goodbye"]);
    assert_eq!(lesson.title, "Parachute Games Lesson");
    Ok(())
}

#[tokio::test]
async fn title_synthesis_rules() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    let lessons = s.engine.lessons_mut();

    // Welcome and Goodbye present: the busiest other category names it.
    let l = lessons.upsert(
        &p,
        n(1),
        lesson("a", &[("Welcome", 1), ("Kodaly Songs", 1), ("Core Songs", 1), ("Core Songs", 1), ("Goodbye", 1)]),
    )?;
    assert_eq!(l.title, "Core Songs Lesson");

    // A focus category without the Welcome/Goodbye frame.
    let l = lessons.upsert(&p, n(2), lesson("b", &[("Kodaly Songs", 1), ("Scarf Songs", 1)]))?;
    assert_eq!(l.title, "Scarf Movement Lesson");

    let l = lessons.upsert(&p, n(3), lesson("c", &[("Art", 1)]))?;
    assert_eq!(l.title, "Art Lesson");

    let l = lessons.upsert(&p, n(4), lesson("d", &[("Art", 1)]).with_title("My Title"))?;
    assert_eq!(l.title, "My Title");
    assert!(l.custom_title);
    Ok(())
}

// ============================================================================
// Partition isolation
// ============================================================================

#[tokio::test]
async fn lesson_written_in_one_year_is_absent_from_the_next() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    s.engine
        .create_lesson(&s.partition.clone(), standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;

    let next_year = s.reopen("LKG", "2025-2026").await?;
    assert!(next_year.numbers().is_empty());

    let same_year = s.reopen("LKG", "2024-2025").await?;
    assert_eq!(same_year.numbers(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn years_of_one_collection_are_edited_independently() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let this_year = s.partition.clone();
    let next_year = Partition::new("LKG", "2025-2026")?;
    s.engine.open_partition(&next_year).await?;

    s.engine
        .create_lesson(&this_year, standard_lesson("a", "Core Songs"), None)?;
    s.engine
        .create_lesson(&next_year, standard_lesson("b", "Scarf Songs"), None)?;
    s.engine
        .create_lesson(&next_year, standard_lesson("c", "Scarf Songs"), None)?;
    s.engine.delete_lesson(&next_year, n(1))?;

    assert_eq!(s.engine.lessons().list_numbers(&this_year), vec![n(1)]);
    assert_eq!(s.engine.lessons().list_numbers(&next_year), vec![n(1)]);
    assert_eq!(
        s.engine.lessons().get(&this_year, n(1)).map(|l| l.title.as_str()),
        Some("Core Songs Lesson")
    );
    Ok(())
}
