use std::io::Write;

use cinelist_core::cache::CacheStats;
use cinelist_core::catalog::{MoviePage, PersonPage};
use cinelist_core::images::{ImageSize, poster, profile};
use cinelist_core::model::{
    AccountDetails, AccountStates, ListDetails, ListSummary, MovieSummary, Paginated, RatedMovie,
};
use cinelist_core::{MutationOutcome, Notice, NoticeLevel};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn year(date: Option<&str>) -> &str {
    date.and_then(|d| d.get(..4)).unwrap_or("----")
}

fn score(vote: Option<f64>) -> String {
    vote.map(|v| format!("{v:.1}"))
        .unwrap_or_else(|| " - ".to_string())
}

fn heading(w: &mut dyn Write, text: &str, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", text.bold())
    } else {
        writeln!(w, "{}", text)
    }
}

/// One line per movie: id, year, score, title.
pub fn print_movies(
    w: &mut dyn Write,
    movies: &[MovieSummary],
    color: ColorMode,
) -> std::io::Result<()> {
    if movies.is_empty() {
        writeln!(w, "No movies.")?;
        return Ok(());
    }
    for m in movies {
        let year = year(m.release_date.as_deref());
        if color.enabled() {
            writeln!(
                w,
                "{:>8}  {}  {}  {}",
                m.id.dimmed(),
                year,
                score(m.vote_average).yellow(),
                m.title
            )?;
        } else {
            writeln!(
                w,
                "{:>8}  {}  {}  {}",
                m.id,
                year,
                score(m.vote_average),
                m.title
            )?;
        }
    }
    Ok(())
}

pub fn print_page(
    w: &mut dyn Write,
    title: &str,
    page: &Paginated<MovieSummary>,
    color: ColorMode,
) -> std::io::Result<()> {
    heading(
        w,
        &format!("{} (page {}/{})", title, page.page, page.total_pages.max(1)),
        color,
    )?;
    print_movies(w, &page.results, color)
}

pub fn print_movie_page(
    w: &mut dyn Write,
    page: &MoviePage,
    color: ColorMode,
) -> std::io::Result<()> {
    let movie = &page.movie;
    heading(
        w,
        &format!("{} ({})", movie.title, year(Some(movie.release_date.as_str()))),
        color,
    )?;
    if let Some(runtime) = movie.runtime {
        writeln!(w, "Runtime: {} min", runtime)?;
    }
    if !movie.genres.is_empty() {
        let genres: Vec<&str> = movie.genres.iter().map(|g| g.name.as_str()).collect();
        writeln!(w, "Genres:  {}", genres.join(", "))?;
    }
    writeln!(w, "Score:   {}", score(movie.vote_average))?;
    if let Some(url) = poster(movie.poster_path.as_deref(), ImageSize::W500).url() {
        writeln!(w, "Poster:  {}", url)?;
    }
    if !movie.overview.is_empty() {
        writeln!(w)?;
        writeln!(w, "{}", movie.overview)?;
    }

    let directors: Vec<&str> = page
        .credits
        .crew
        .iter()
        .filter(|c| c.job == "Director")
        .map(|c| c.name.as_str())
        .collect();
    if !directors.is_empty() {
        writeln!(w)?;
        writeln!(w, "Directed by {}", directors.join(", "))?;
    }
    if !page.credits.cast.is_empty() {
        writeln!(w)?;
        heading(w, "Cast", color)?;
        for member in page.credits.cast.iter().take(10) {
            if color.enabled() {
                writeln!(
                    w,
                    "{:>8}  {} {}",
                    member.id.dimmed(),
                    member.name,
                    format!("as {}", member.character).dimmed()
                )?;
            } else {
                writeln!(w, "{:>8}  {} as {}", member.id, member.name, member.character)?;
            }
        }
    }
    if !page.trailers.is_empty() {
        writeln!(w)?;
        heading(w, "Trailers", color)?;
        for video in &page.trailers {
            if let Some(url) = video.watch_url() {
                writeln!(w, "  {}  {}", video.name, url)?;
            }
        }
    }
    if !page.similar.is_empty() {
        writeln!(w)?;
        heading(w, "Similar", color)?;
        print_movies(w, &page.similar[..page.similar.len().min(10)], color)?;
    }
    Ok(())
}

pub fn print_person_page(
    w: &mut dyn Write,
    page: &PersonPage,
    color: ColorMode,
) -> std::io::Result<()> {
    let person = &page.person;
    heading(w, &person.name, color)?;
    if let Some(dept) = &person.known_for_department {
        writeln!(w, "Known for: {}", dept)?;
    }
    if let Some(born) = &person.birthday {
        match &person.place_of_birth {
            Some(place) => writeln!(w, "Born:      {} in {}", born, place)?,
            None => writeln!(w, "Born:      {}", born)?,
        }
    }
    if let Some(url) = profile(person.profile_path.as_deref(), ImageSize::W185).url() {
        writeln!(w, "Photo:     {}", url)?;
    }
    if !person.biography.is_empty() {
        writeln!(w)?;
        writeln!(w, "{}", person.biography)?;
    }

    let mut cast = page.credits.cast.clone();
    cast.sort_by(|a, b| b.release_date.cmp(&a.release_date));
    if !cast.is_empty() {
        writeln!(w)?;
        heading(w, "Movies", color)?;
        for credit in cast.iter().take(20) {
            let year = year(credit.release_date.as_deref());
            if color.enabled() {
                writeln!(
                    w,
                    "{:>8}  {}  {} {}",
                    credit.id.dimmed(),
                    year,
                    credit.title,
                    format!("({})", credit.character).dimmed()
                )?;
            } else {
                writeln!(
                    w,
                    "{:>8}  {}  {} ({})",
                    credit.id, year, credit.title, credit.character
                )?;
            }
        }
    }
    Ok(())
}

pub fn print_lists(
    w: &mut dyn Write,
    lists: &[ListSummary],
    color: ColorMode,
) -> std::io::Result<()> {
    if lists.is_empty() {
        writeln!(w, "No lists yet. Create one with: cinelist list create <name>")?;
        return Ok(());
    }
    for list in lists {
        let visibility = if list.public { "public" } else { "private" };
        if color.enabled() {
            writeln!(
                w,
                "{:>8}  {}  {} {}",
                list.id.dimmed(),
                list.name.bold(),
                format!("{} items", list.item_count).cyan(),
                visibility.dimmed()
            )?;
        } else {
            writeln!(
                w,
                "{:>8}  {}  {} items {}",
                list.id, list.name, list.item_count, visibility
            )?;
        }
    }
    Ok(())
}

pub fn print_list(w: &mut dyn Write, list: &ListDetails, color: ColorMode) -> std::io::Result<()> {
    heading(w, &format!("{} ({} items)", list.name, list.items.len()), color)?;
    if !list.description.is_empty() {
        writeln!(w, "{}", list.description)?;
    }
    for entry in &list.items {
        let title = entry.title.as_deref().unwrap_or("(untitled)");
        if color.enabled() {
            writeln!(w, "  {:<14} {}", entry.media.to_string().dimmed(), title)?;
        } else {
            writeln!(w, "  {:<14} {}", entry.media, title)?;
        }
    }
    Ok(())
}

pub fn print_states(
    w: &mut dyn Write,
    movie_id: u64,
    states: &AccountStates,
    color: ColorMode,
) -> std::io::Result<()> {
    let mark = |on: bool| if on { "yes" } else { "no" };
    heading(w, &format!("Movie {}", movie_id), color)?;
    writeln!(w, "Favorite:  {}", mark(states.favorite))?;
    writeln!(w, "Watchlist: {}", mark(states.watchlist))?;
    match states.rating_percent() {
        Some(p) => writeln!(w, "Rating:    {}/100", p),
        None => writeln!(w, "Rating:    -"),
    }
}

pub fn print_rated(
    w: &mut dyn Write,
    rated: &[RatedMovie],
    color: ColorMode,
) -> std::io::Result<()> {
    if rated.is_empty() {
        writeln!(w, "No rated movies.")?;
        return Ok(());
    }
    for r in rated {
        let value = r.value().map(|v| format!("{v:>4.1}")).unwrap_or_default();
        if color.enabled() {
            writeln!(w, "{:>8}  {}  {}", r.movie.id.dimmed(), value.yellow(), r.movie.title)?;
        } else {
            writeln!(w, "{:>8}  {}  {}", r.movie.id, value, r.movie.title)?;
        }
    }
    Ok(())
}

pub fn print_account(
    w: &mut dyn Write,
    account: &AccountDetails,
    color: ColorMode,
) -> std::io::Result<()> {
    let name = account
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&account.username);
    if color.enabled() {
        writeln!(w, "Signed in as {} ({})", name.bold(), account.username)
    } else {
        writeln!(w, "Signed in as {} ({})", name, account.username)
    }
}

pub fn print_outcome(
    w: &mut dyn Write,
    what: &str,
    outcome: MutationOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    match outcome {
        MutationOutcome::Applied => Ok(()),
        MutationOutcome::Unchanged => {
            if color.enabled() {
                writeln!(w, "{}", format!("{what}: nothing to do").dimmed())
            } else {
                writeln!(w, "{what}: nothing to do")
            }
        }
    }
}

pub fn print_notice(w: &mut dyn Write, notice: &Notice, color: ColorMode) -> std::io::Result<()> {
    match (notice.level, color.enabled()) {
        (NoticeLevel::Success, true) => writeln!(w, "{}", notice.message.green()),
        (NoticeLevel::Error, true) => writeln!(w, "{} {}", "ERROR:".red().bold(), notice.message),
        (NoticeLevel::Success, false) => writeln!(w, "{}", notice.message),
        (NoticeLevel::Error, false) => writeln!(w, "ERROR: {}", notice.message),
    }
}

pub fn print_cache_stats(
    w: &mut dyn Write,
    stats: &CacheStats,
    color: ColorMode,
) -> std::io::Result<()> {
    heading(w, "Query cache", color)?;
    writeln!(
        w,
        "Entries:   {} in memory, {} on disk{}",
        stats.entries,
        stats.disk_entries,
        if stats.persistent { "" } else { " (memory only)" }
    )?;
    writeln!(w, "Hits:      {}", stats.hits)?;
    writeln!(w, "Misses:    {}", stats.misses)?;
    writeln!(w, "Fetches:   {} ({} failed)", stats.fetches, stats.failures)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: u64, title: &str, date: Option<&str>) -> MovieSummary {
        MovieSummary {
            id,
            title: title.to_string(),
            poster_path: None,
            release_date: date.map(String::from),
            vote_average: Some(8.4),
        }
    }

    fn render(f: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn movie_lines_are_plain_without_color() {
        let out = render(|w| {
            print_movies(
                w,
                &[movie(550, "Fight Club", Some("1999-10-15"))],
                ColorMode(false),
            )
        });
        assert_eq!(out, "     550  1999  8.4  Fight Club\n");
    }

    #[test]
    fn missing_release_date_is_dashed() {
        let out = render(|w| print_movies(w, &[movie(1, "Untitled", None)], ColorMode(false)));
        assert!(out.contains("----"));
    }

    #[test]
    fn unchanged_outcome_is_reported() {
        let out = render(|w| {
            print_outcome(w, "add movie:550", MutationOutcome::Unchanged, ColorMode(false))
        });
        assert_eq!(out, "add movie:550: nothing to do\n");
        let out =
            render(|w| print_outcome(w, "add", MutationOutcome::Applied, ColorMode(false)));
        assert!(out.is_empty());
    }
}
