mod fallback;
mod support;
