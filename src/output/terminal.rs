// Colored terminal output for activity summaries and profiles.
//
// main.rs and the replay runner delegate here; nothing in this module
// touches the store.

use colored::Colorize;

use crate::activity::{ActivitySummary, SourceHealth, SourceKind, SourceStatus};
use crate::social::Profile;

/// Display an activity summary: badge total, then each section.
pub fn display_summary(summary: &ActivitySummary) {
    let user = match &summary.user_id {
        Some(user) => user.to_string(),
        None => {
            println!("{}", "Activity aggregator stopped.".dimmed());
            return;
        }
    };

    println!(
        "\n{}",
        format!("=== Activity for {user} (#{}) ===", summary.sequence).bold()
    );
    let total = summary.total_unread();
    let badge = if total == 0 {
        "0".green().to_string()
    } else {
        total.to_string().yellow().bold().to_string()
    };
    println!("  Unread total: {badge}");
    display_health(&summary.health);

    println!(
        "\n  Unread messages: {}",
        summary.unread_message_count.to_string().bold()
    );
    for message in &summary.unread_messages {
        println!(
            "    [{}] {:<12} {}",
            message.sent_at.to_string().dimmed(),
            message.sender_id,
            super::truncate_chars(&message.content, 80),
        );
    }
    let hidden = (summary.unread_message_count as usize).saturating_sub(summary.unread_messages.len());
    if hidden > 0 {
        println!("    {}", format!("... and {hidden} more").dimmed());
    }

    println!(
        "\n  New followers: {}",
        summary.new_followers.len().to_string().bold()
    );
    for follower in &summary.new_followers {
        println!(
            "    [{}] {}",
            follower.followed_at.to_string().dimmed(),
            follower.follower_id
        );
    }

    println!("\n  New posts: {}", summary.new_posts.len().to_string().bold());
    for post in &summary.new_posts {
        println!(
            "    [{}] {:<12} {}",
            post.posted_at.to_string().dimmed(),
            post.author_id,
            super::truncate_chars(&post.content, 80),
        );
    }
    println!();
}

fn display_health(health: &SourceHealth) {
    let line: Vec<String> = SourceKind::ALL
        .iter()
        .map(|kind| format!("{}: {}", kind, colorize_status(health.get(*kind))))
        .collect();
    println!("  Sources: {}", line.join("  "));

    for kind in SourceKind::ALL {
        if let Some(reason) = health.get(kind).reason() {
            println!("    {} {}: {}", "Warning:".yellow(), kind, reason);
        }
    }
}

/// Display a user's profile counters.
pub fn display_profile(profile: &Profile) {
    let title = match &profile.username {
        Some(name) => format!("=== {} ({}) ===", name, profile.user_id),
        None => format!("=== {} ===", profile.user_id),
    };
    println!("\n{}", title.bold());
    let details = [
        ("Name", profile.real_name.clone()),
        ("Age", profile.age.map(|a| a.to_string())),
        ("Height", profile.height.map(|h| h.to_string())),
        ("School", profile.current_school.clone()),
        ("Year", profile.school_year.clone()),
        ("Picture", profile.profile_picture_url.clone()),
    ];
    for (label, value) in details {
        if let Some(value) = value {
            println!("  {label}: {value}");
        }
    }
    println!("  Followers: {}", profile.followers_count);
    println!("  Following: {}", profile.following_count);
}

fn colorize_status(status: &SourceStatus) -> colored::ColoredString {
    let label = status.label();
    match status {
        SourceStatus::Live => label.green(),
        SourceStatus::Stale { .. } => label.yellow(),
        SourceStatus::Failed { .. } | SourceStatus::Unavailable { .. } => label.red(),
        SourceStatus::Inactive | SourceStatus::Idle | SourceStatus::Connecting => label.dimmed(),
    }
}
