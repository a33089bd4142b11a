use http::StatusCode;

use crate::core::reply::Reply;
use crate::session::RequestContext;
use crate::templates::{self, Layout, PostView};

/// Posts shown on the home page until real posting lands.
fn placeholder_posts() -> Vec<PostView> {
    [
        ("John", "Beautiful day in Portland!"),
        ("Susan", "The Avengers movie was so cool!"),
    ]
    .iter()
    .map(|(author, body)| PostView {
        author: author.to_string(),
        author_url: None,
        avatar_url: None,
        body: body.to_string(),
    })
    .collect()
}

/// `GET /` and `GET /index`
pub fn index(ctx: &mut RequestContext) -> anyhow::Result<Reply> {
    let flashes = ctx.take_flashes();
    let layout = Layout {
        title: "Home",
        user: ctx.user.as_ref(),
        flashes: &flashes,
    };
    let html = templates::render_index(&layout, &placeholder_posts())?;
    Ok(Reply::html(StatusCode::OK, html))
}
