mod demuxer;
