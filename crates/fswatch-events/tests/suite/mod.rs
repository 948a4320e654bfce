mod dispatch;
mod lifecycle;
mod symlinks;
